mod common;

use std::sync::Arc;

use common::{RecordingStore, ScriptedLlm, separated_chunks};
use raptor_rag::{
    config::RetrievalConfig,
    embedding::HashingEmbeddingClient,
    node::Node,
    retrieval::{LevelAwareRetriever, RetrieverFactory},
    store::{InMemoryTreeStore, TreeStore},
};

fn summary(level: u32, text: &str) -> Node {
    Node::summary(text.to_string(), level, "src", "nb", Some(0), vec![])
        .with_embedding(vec![0.25; 16])
}

async fn populated_store() -> Arc<RecordingStore> {
    let store = Arc::new(RecordingStore::default());
    store
        .add_tree_nodes(&separated_chunks(6, 3, "src", "nb"), "nb", "src", 0, None)
        .await
        .unwrap();
    for level in 1..=3 {
        store
            .add_tree_nodes(&[summary(level, "Overview of the topics.")], "nb", "src", level, None)
            .await
            .unwrap();
    }
    store
}

#[tokio::test]
async fn sources_without_summaries_get_leaf_results() {
    let store = Arc::new(InMemoryTreeStore::new());
    store
        .add_tree_nodes(&separated_chunks(5, 5, "flat", "nb"), "nb", "flat", 0, None)
        .await
        .unwrap();
    let retriever = LevelAwareRetriever::new(
        store,
        Arc::new(HashingEmbeddingClient::new(16)),
        RetrievalConfig::default(),
    )
    .with_llm(Arc::new(ScriptedLlm::with_intent("SUMMARY")));

    let sources = vec!["flat".to_string()];
    let results = retriever
        .retrieve("What are the topics about?", "nb", Some(&sources))
        .await;

    assert!(!results.is_empty());
    assert!(results.iter().all(|hit| hit.node.tree_level == 0));
}

#[tokio::test]
async fn summary_intent_reads_only_summary_levels() {
    let store = populated_store().await;
    let retriever = LevelAwareRetriever::new(
        store.clone(),
        Arc::new(HashingEmbeddingClient::new(16)),
        RetrievalConfig::default(),
    )
    .with_llm(Arc::new(ScriptedLlm::with_intent("SUMMARY")));

    let results = retriever.retrieve("Summarize the document", "nb", None).await;

    assert!(!results.is_empty());
    let allowed = RetrievalConfig::default().summary_query_levels;
    assert!(store.requested().iter().all(|level| allowed.contains(level)));
    assert!(results.iter().any(|hit| hit.node.tree_level >= 1));
}

#[tokio::test]
async fn detail_intent_reads_only_detail_levels() {
    let store = populated_store().await;
    let retriever = LevelAwareRetriever::new(
        store.clone(),
        Arc::new(HashingEmbeddingClient::new(16)),
        RetrievalConfig::default(),
    )
    .with_llm(Arc::new(ScriptedLlm::with_intent("DETAIL")));

    let results = retriever.retrieve("Which sentence mentions topic 2?", "nb", None).await;

    assert!(!results.is_empty());
    assert_eq!(store.requested(), vec![0, 1]);
    assert!(results.iter().all(|hit| hit.node.tree_level <= 1));
}

#[tokio::test]
async fn results_are_sorted_and_bounded() {
    let store = populated_store().await;
    let config = RetrievalConfig {
        similarity_top_k: 3,
        ..RetrievalConfig::default()
    };
    let factory = RetrieverFactory::new(
        store,
        Arc::new(HashingEmbeddingClient::new(16)),
        Some(Arc::new(ScriptedLlm::with_intent("MIXED"))),
        config,
    );

    let results = factory.retriever().retrieve("topic sentence", "nb", None).await;

    assert_eq!(results.len(), 3);
    assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));
}
