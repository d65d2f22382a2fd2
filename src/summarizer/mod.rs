//! Abstractive summaries of clusters and of summary sets.
//!
//! The summarizer never fails: when the completion provider is missing, errors, or returns
//! nothing, the summary falls back to the first sentences of the input texts so the tree
//! build can continue.

mod prompt;

use crate::config::SummarizerConfig;
use crate::llm::LlmClient;
use crate::node::{Cluster, Node};
use std::sync::Arc;

/// Produces summary nodes from clusters and from lower-level summaries.
#[derive(Clone)]
pub struct Summarizer {
    llm: Option<Arc<dyn LlmClient>>,
    config: SummarizerConfig,
}

impl Summarizer {
    /// Summarizer backed by a completion provider.
    pub fn new(llm: Arc<dyn LlmClient>, config: SummarizerConfig) -> Self {
        Self {
            llm: Some(llm),
            config,
        }
    }

    /// Summarizer that only produces extractive summaries.
    pub fn extractive(config: SummarizerConfig) -> Self {
        Self { llm: None, config }
    }

    /// Summarize the members of `cluster`, which index into `nodes`.
    ///
    /// The returned node lists the member ids, in cluster order, as its children.
    pub async fn summarize_cluster(
        &self,
        cluster: &Cluster,
        nodes: &[Node],
        tree_level: u32,
        source_id: &str,
        notebook_id: &str,
    ) -> Node {
        let texts: Vec<&str> = cluster
            .members
            .iter()
            .filter_map(|&idx| nodes.get(idx))
            .map(|node| node.text.as_str())
            .collect();

        let context = prompt::format_texts(
            &texts,
            prompt::CHUNK_LABEL,
            self.config.max_chunks_per_summary,
            self.config.max_input_tokens,
        );
        let text = self.generate(&prompt::cluster_prompt(&context), &texts).await;

        tracing::debug!(
            source_id,
            tree_level,
            cluster_id = cluster.cluster_id,
            members = texts.len(),
            "Summarized cluster"
        );

        Node::summary(
            text,
            tree_level,
            source_id,
            notebook_id,
            Some(cluster.cluster_id),
            cluster.member_ids.clone(),
        )
    }

    /// Summarize a set of summaries into one overview node.
    pub async fn summarize_summaries(
        &self,
        summaries: &[Node],
        tree_level: u32,
        source_id: &str,
        notebook_id: &str,
    ) -> Node {
        let texts: Vec<&str> = summaries.iter().map(|node| node.text.as_str()).collect();

        let context = prompt::format_texts(
            &texts,
            prompt::SUMMARY_LABEL,
            self.config.max_chunks_per_summary,
            self.config.max_input_tokens,
        );
        let text = self.generate(&prompt::root_prompt(&context), &texts).await;

        tracing::debug!(source_id, tree_level, inputs = texts.len(), "Summarized summaries");

        Node::summary(
            text,
            tree_level,
            source_id,
            notebook_id,
            None,
            summaries.iter().map(|node| node.id.clone()).collect(),
        )
    }

    async fn generate(&self, prompt: &str, texts: &[&str]) -> String {
        let Some(llm) = &self.llm else {
            return prompt::fallback_summary(texts, self.config.fallback_sentences);
        };

        match llm.complete(prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("LLM returned an empty summary; using extractive fallback");
                prompt::fallback_summary(texts, self.config.fallback_sentences)
            }
            Err(error) => {
                tracing::warn!(%error, "LLM summarization failed; using extractive fallback");
                prompt::fallback_summary(texts, self.config.fallback_sentences)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::node::{NodeType, estimate_tokens};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingLlm {
        reply: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingLlm {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err("offline".into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for RecordingLlm {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().map_err(LlmError::ProviderUnavailable)
        }
    }

    fn nodes() -> Vec<Node> {
        vec![
            Node::chunk("a", "Cats purr. They nap often.", None, "s", "n"),
            Node::chunk("b", "Dogs bark loudly. They fetch.", None, "s", "n"),
            Node::chunk("c", "Birds sing at dawn.", None, "s", "n"),
        ]
    }

    fn cluster_of(members: Vec<usize>, nodes: &[Node]) -> Cluster {
        Cluster {
            cluster_id: 2,
            member_ids: members.iter().map(|&i| nodes[i].id.clone()).collect(),
            probabilities: vec![1.0; members.len()],
            members,
            centroid: None,
        }
    }

    #[tokio::test]
    async fn cluster_summary_uses_llm_text_and_member_ids() {
        let llm = RecordingLlm::replying("  Animals and their habits.  ");
        let summarizer = Summarizer::new(llm.clone(), SummarizerConfig::default());
        let nodes = nodes();
        let cluster = cluster_of(vec![2, 0], &nodes);

        let summary = summarizer
            .summarize_cluster(&cluster, &nodes, 1, "s", "n")
            .await;

        assert_eq!(summary.text, "Animals and their habits.");
        assert_eq!(summary.node_type, NodeType::Summary);
        assert_eq!(summary.tree_level, 1);
        assert_eq!(summary.cluster_id, Some(2));
        assert_eq!(summary.child_node_ids, vec!["c", "a"]);
        assert_eq!(summary.token_count, Some(estimate_tokens(&summary.text)));

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("[Chunk 1]\nBirds sing at dawn."));
        assert!(prompts[0].contains("[Chunk 2]\nCats purr."));
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_first_sentences() {
        let summarizer = Summarizer::new(RecordingLlm::failing(), SummarizerConfig::default());
        let nodes = nodes();
        let cluster = cluster_of(vec![0, 1, 2], &nodes);

        let summary = summarizer
            .summarize_cluster(&cluster, &nodes, 1, "s", "n")
            .await;

        assert_eq!(summary.text, "Cats purr. Dogs bark loudly. Birds sing at dawn.");
        assert_eq!(summary.child_node_ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn empty_llm_reply_falls_back() {
        let summarizer = Summarizer::new(RecordingLlm::replying("   "), SummarizerConfig::default());
        let nodes = nodes();
        let cluster = cluster_of(vec![1], &nodes);

        let summary = summarizer
            .summarize_cluster(&cluster, &nodes, 1, "s", "n")
            .await;

        assert_eq!(summary.text, "Dogs bark loudly.");
    }

    #[tokio::test]
    async fn root_summary_labels_summaries() {
        let llm = RecordingLlm::replying("Overview.");
        let summarizer = Summarizer::new(llm.clone(), SummarizerConfig::default());
        let children = nodes();

        let root = summarizer.summarize_summaries(&children, 3, "s", "n").await;

        assert_eq!(root.tree_level, 3);
        assert_eq!(root.cluster_id, None);
        assert_eq!(root.child_node_ids, vec!["a", "b", "c"]);
        assert!(llm.prompts.lock().unwrap()[0].contains("[Summary 3]"));
    }

    #[tokio::test]
    async fn extractive_summarizer_never_calls_out() {
        let summarizer = Summarizer::extractive(SummarizerConfig::default());
        let root = summarizer.summarize_summaries(&nodes(), 1, "s", "n").await;
        assert_eq!(root.text, "Cats purr. Dogs bark loudly. Birds sing at dawn.");
    }
}
