mod common;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use common::{FailingLlm, ScriptedLlm, separated_chunks};
use raptor_rag::{
    clustering::ClusteringEngine,
    config::{ClusteringConfig, RaptorConfig, SummarizerConfig},
    embedding::HashingEmbeddingClient,
    node::{Cluster, Node, NodeType, TreeBuildResult},
    summarizer::Summarizer,
    tree::TreeBuilder,
};

fn builder(llm: Option<Arc<dyn raptor_rag::llm::LlmClient>>) -> TreeBuilder {
    let config = RaptorConfig::default();
    let summarizer = match llm {
        Some(llm) => Summarizer::new(llm, config.summarizer.clone()),
        None => Summarizer::extractive(config.summarizer.clone()),
    };
    TreeBuilder::new(&config, summarizer, Arc::new(HashingEmbeddingClient::new(16)))
}

fn descendants(result: &TreeBuildResult) -> HashSet<String> {
    let by_id: HashMap<&str, &Node> = result
        .summary_nodes
        .iter()
        .map(|node| (node.id.as_str(), node))
        .collect();
    let mut reached = HashSet::new();
    let mut stack: Vec<String> = result.tree_root_id.iter().cloned().collect();
    while let Some(id) = stack.pop() {
        if let Some(node) = by_id.get(id.as_str()) {
            stack.extend(node.child_node_ids.iter().cloned());
        } else {
            reached.insert(id);
        }
    }
    reached
}

#[tokio::test]
async fn three_chunks_stay_a_single_level() {
    let result = builder(None)
        .build_tree(separated_chunks(3, 3, "src", "nb"), "src", "nb")
        .await;

    assert!(result.success);
    assert_eq!(result.levels, BTreeMap::from([(0, 3)]));
    assert_eq!(result.max_level, 0);
    assert!(result.summary_nodes.is_empty());
}

#[tokio::test]
async fn twenty_separated_chunks_grow_summary_levels() {
    let result = builder(Some(Arc::new(ScriptedLlm::summaries())))
        .build_tree(separated_chunks(20, 4, "src", "nb"), "src", "nb")
        .await;

    assert!(result.success, "{:?}", result.error);
    assert!(result.max_level >= 1);
    assert!(result.total_nodes > 20);
    assert!(result
        .summary_nodes
        .iter()
        .any(|node| node.node_type == NodeType::Summary));
}

#[tokio::test]
async fn failing_llm_falls_back_to_extractive_text() {
    let summarizer = Summarizer::new(Arc::new(FailingLlm), SummarizerConfig::default());
    let nodes = separated_chunks(4, 2, "src", "nb");
    let cluster = Cluster::single(&nodes);

    let summary = summarizer.summarize_cluster(&cluster, &nodes, 1, "src", "nb").await;

    assert!(!summary.text.trim().is_empty());
    assert_eq!(summary.child_node_ids.len(), 4);
    assert_eq!(summary.tree_level, 1);
}

#[tokio::test]
async fn root_closure_covers_every_chunk() {
    let chunks = separated_chunks(24, 3, "src", "nb");
    let expected: HashSet<String> = chunks.iter().map(|node| node.id.clone()).collect();

    let result = builder(Some(Arc::new(FailingLlm)))
        .build_tree(chunks, "src", "nb")
        .await;

    assert!(result.success);
    assert!(result.max_level >= 1);
    assert_eq!(descendants(&result), expected);
}

#[test]
fn small_sets_form_one_certain_cluster() {
    let engine = ClusteringEngine::new(ClusteringConfig::default());
    let nodes = separated_chunks(2, 2, "src", "nb");

    let clusters = engine.cluster(&nodes);

    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].members, vec![0, 1]);
    assert!(clusters[0].probabilities.iter().all(|p| *p == 1.0));
}

#[test]
fn clustering_is_deterministic_and_covers_every_node() {
    let engine = ClusteringEngine::new(ClusteringConfig::default());
    let nodes = separated_chunks(18, 3, "src", "nb");

    let first = engine.cluster(&nodes);
    let second = engine.cluster(&nodes);

    assert_eq!(first, second);
    let covered: HashSet<usize> = first.iter().flat_map(|c| c.members.iter().copied()).collect();
    assert_eq!(covered.len(), nodes.len());
}

#[test]
fn blocking_and_async_builds_agree() {
    let builder = builder(None);

    let blocking = builder.build_tree_blocking(separated_chunks(15, 3, "src", "nb"), "src", "nb");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let awaited = runtime.block_on(builder.build_tree(separated_chunks(15, 3, "src", "nb"), "src", "nb"));

    assert!(blocking.success && awaited.success);
    assert_eq!(blocking.levels, awaited.levels);
    assert_eq!(blocking.max_level, awaited.max_level);
}
