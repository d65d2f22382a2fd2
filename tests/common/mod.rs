#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use raptor_rag::{
    embedding::{EmbeddingClient, EmbeddingError},
    llm::{LlmClient, LlmError},
    node::Node,
    store::{InMemoryTreeStore, StoreError, TreeStats, TreeStore},
};

/// Completion client that fails every call.
pub struct FailingLlm;

#[async_trait]
impl LlmClient for FailingLlm {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::ProviderUnavailable("connection refused".into()))
    }
}

/// Completion client answering intent prompts with a fixed label and everything else with
/// a fixed summary.
pub struct ScriptedLlm {
    pub intent: &'static str,
    pub summary: &'static str,
}

impl ScriptedLlm {
    pub fn summaries() -> Self {
        Self {
            intent: "DETAIL",
            summary: "A concise summary of the cluster.",
        }
    }

    pub fn with_intent(intent: &'static str) -> Self {
        Self {
            intent,
            summary: "A concise summary of the cluster.",
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        if prompt.contains("SUMMARY, DETAIL, or MIXED") {
            Ok(self.intent.to_string())
        } else if prompt.contains("search queries") {
            Ok(String::new())
        } else {
            Ok(self.summary.to_string())
        }
    }
}

/// Completion client that waits `delay` before answering with a fixed summary.
pub struct SlowLlm {
    pub delay: Duration,
}

#[async_trait]
impl LlmClient for SlowLlm {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        tokio::time::sleep(self.delay).await;
        Ok("A slowly written summary.".to_string())
    }
}

/// Embedding client that fails every call.
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingClient for FailingEmbedder {
    async fn embed_batch(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::GenerationFailed("embedding backend offline".into()))
    }
}

/// Store whose reads succeed and whose writes fail, counting write attempts.
#[derive(Default)]
pub struct ReadOnlyStore {
    pub inner: InMemoryTreeStore,
    pub write_attempts: AtomicUsize,
}

impl ReadOnlyStore {
    pub fn writes(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TreeStore for ReadOnlyStore {
    async fn get_nodes_by_tree_level(
        &self,
        notebook_id: &str,
        level: u32,
        source_ids: Option<&[String]>,
    ) -> Result<Vec<Node>, StoreError> {
        self.inner
            .get_nodes_by_tree_level(notebook_id, level, source_ids)
            .await
    }

    async fn add_tree_nodes(
        &self,
        _nodes: &[Node],
        _notebook_id: &str,
        _source_id: &str,
        _level: u32,
        _tree_root_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("disk full".into()))
    }

    async fn get_tree_stats(&self, source_id: &str) -> Result<TreeStats, StoreError> {
        self.inner.get_tree_stats(source_id).await
    }

    async fn delete_tree_nodes(&self, source_id: &str, min_level: u32) -> Result<usize, StoreError> {
        self.inner.delete_tree_nodes(source_id, min_level).await
    }
}

/// In-memory store tracking how many sources are between chunk load and leaf upsert.
#[derive(Default)]
pub struct ConcurrencyStore {
    pub inner: InMemoryTreeStore,
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl ConcurrencyStore {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TreeStore for ConcurrencyStore {
    async fn get_nodes_by_tree_level(
        &self,
        notebook_id: &str,
        level: u32,
        source_ids: Option<&[String]>,
    ) -> Result<Vec<Node>, StoreError> {
        if level == 0 && source_ids.is_some() {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }
        self.inner
            .get_nodes_by_tree_level(notebook_id, level, source_ids)
            .await
    }

    async fn add_tree_nodes(
        &self,
        nodes: &[Node],
        notebook_id: &str,
        source_id: &str,
        level: u32,
        tree_root_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        let written = self
            .inner
            .add_tree_nodes(nodes, notebook_id, source_id, level, tree_root_id)
            .await;
        if level == 0 && tree_root_id.is_some() {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        written
    }

    async fn get_tree_stats(&self, source_id: &str) -> Result<TreeStats, StoreError> {
        self.inner.get_tree_stats(source_id).await
    }

    async fn delete_tree_nodes(&self, source_id: &str, min_level: u32) -> Result<usize, StoreError> {
        self.inner.delete_tree_nodes(source_id, min_level).await
    }
}

/// In-memory store that remembers which levels were queried.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: InMemoryTreeStore,
    pub requested_levels: Mutex<Vec<u32>>,
}

impl RecordingStore {
    pub fn requested(&self) -> Vec<u32> {
        let mut levels = self.requested_levels.lock().unwrap().clone();
        levels.sort_unstable();
        levels.dedup();
        levels
    }
}

#[async_trait]
impl TreeStore for RecordingStore {
    async fn get_nodes_by_tree_level(
        &self,
        notebook_id: &str,
        level: u32,
        source_ids: Option<&[String]>,
    ) -> Result<Vec<Node>, StoreError> {
        self.requested_levels.lock().unwrap().push(level);
        self.inner
            .get_nodes_by_tree_level(notebook_id, level, source_ids)
            .await
    }

    async fn add_tree_nodes(
        &self,
        nodes: &[Node],
        notebook_id: &str,
        source_id: &str,
        level: u32,
        tree_root_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        self.inner
            .add_tree_nodes(nodes, notebook_id, source_id, level, tree_root_id)
            .await
    }

    async fn get_tree_stats(&self, source_id: &str) -> Result<TreeStats, StoreError> {
        self.inner.get_tree_stats(source_id).await
    }

    async fn delete_tree_nodes(&self, source_id: &str, min_level: u32) -> Result<usize, StoreError> {
        self.inner.delete_tree_nodes(source_id, min_level).await
    }
}

/// `count` chunks spread over `groups` well-separated directions of a 16-dimensional space.
pub fn separated_chunks(count: usize, groups: usize, source_id: &str, notebook_id: &str) -> Vec<Node> {
    (0..count)
        .map(|i| {
            let group = i % groups;
            let mut vector = vec![0.0_f32; 16];
            vector[group] = 1.0;
            vector[8 + (i / groups) % 8] = 0.05;
            Node::chunk(
                format!("{source_id}-chunk-{i}"),
                format!("Topic {group} sentence {i} carries detail. It continues here."),
                Some(vector),
                source_id,
                notebook_id,
            )
        })
        .collect()
}
