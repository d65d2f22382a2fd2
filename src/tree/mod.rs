//! Recursive tree construction over pre-embedded chunks.
//!
//! Each round clusters the current level, summarizes every cluster, embeds the summaries in
//! one batch, and promotes them to the next level. Recursion stops when a level is too small
//! to cluster, the depth limit is reached, or clustering collapses to a single cluster. The
//! remaining top-level nodes are then folded into one root whose id is stamped on every node.

mod persist;

pub use persist::persist_tree;

use crate::clustering::ClusteringEngine;
use crate::config::{RaptorConfig, TreeConfig};
use crate::embedding::{EmbeddingClient, EmbeddingError};
use crate::node::{Cluster, Node, TreeBuildResult};
use crate::summarizer::Summarizer;
use futures_util::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Reasons a tree build fails.
#[derive(Debug, Error)]
pub enum TreeBuildError {
    /// No chunks were supplied.
    #[error("No chunks supplied for tree build")]
    EmptyInput,
    /// Summaries could not be embedded.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// The blocking variant could not start its runtime.
    #[error("Failed to start build runtime: {0}")]
    Runtime(String),
}

/// Builds multi-level summary trees for one source at a time.
#[derive(Clone)]
pub struct TreeBuilder {
    config: TreeConfig,
    clustering: ClusteringEngine,
    summarizer: Summarizer,
    embedder: Arc<dyn EmbeddingClient>,
}

impl TreeBuilder {
    /// Assemble a builder from the algorithm settings and its capabilities.
    pub fn new(
        config: &RaptorConfig,
        summarizer: Summarizer,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Self {
        Self {
            config: config.tree.clone(),
            clustering: ClusteringEngine::new(config.clustering.clone()),
            summarizer,
            embedder,
        }
    }

    /// Build a tree over `chunks`; failures are reported in the result.
    pub async fn build_tree(
        &self,
        chunks: Vec<Node>,
        source_id: &str,
        notebook_id: &str,
    ) -> TreeBuildResult {
        let started = Instant::now();
        tracing::info!(source_id, notebook_id, chunks = chunks.len(), "Starting tree build");

        match self.try_build(chunks, source_id, notebook_id, started).await {
            Ok(result) => {
                tracing::info!(
                    source_id,
                    total_nodes = result.total_nodes,
                    max_level = result.max_level,
                    elapsed_ms = result.build_time.as_millis() as u64,
                    "Tree build completed"
                );
                result
            }
            Err(error) => {
                tracing::warn!(source_id, %error, "Tree build failed");
                TreeBuildResult::failure(source_id, notebook_id, started.elapsed(), error.to_string())
            }
        }
    }

    /// Synchronous variant of [`TreeBuilder::build_tree`].
    ///
    /// Drives the same build on a private current-thread runtime, so it must not be called
    /// from within an async context.
    pub fn build_tree_blocking(
        &self,
        chunks: Vec<Node>,
        source_id: &str,
        notebook_id: &str,
    ) -> TreeBuildResult {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(error) => {
                let error = TreeBuildError::Runtime(error.to_string());
                tracing::warn!(source_id, %error, "Tree build failed");
                return TreeBuildResult::failure(
                    source_id,
                    notebook_id,
                    std::time::Duration::ZERO,
                    error.to_string(),
                );
            }
        };
        runtime.block_on(self.build_tree(chunks, source_id, notebook_id))
    }

    async fn try_build(
        &self,
        chunks: Vec<Node>,
        source_id: &str,
        notebook_id: &str,
        started: Instant,
    ) -> Result<TreeBuildResult, TreeBuildError> {
        if chunks.is_empty() {
            return Err(TreeBuildError::EmptyInput);
        }

        let leaves: Vec<Node> = chunks
            .into_iter()
            .map(|chunk| chunk.into_leaf(source_id, notebook_id))
            .collect();

        let mut levels = BTreeMap::from([(0_u32, leaves.len())]);
        let mut summaries: Vec<Node> = Vec::new();
        let mut current = leaves.clone();
        let mut level = 0_u32;

        while current.len() >= self.config.min_nodes_to_cluster && level < self.config.max_tree_depth {
            let clusters = self.clustering.cluster(&current);
            if clusters.len() == 1 && level > 0 {
                tracing::debug!(source_id, level, "Level collapsed to one cluster");
                break;
            }

            let next_level = level + 1;
            let produced = self
                .summarize_level(&clusters, &current, next_level, source_id, notebook_id)
                .await;
            let produced = self.embed_nodes(produced).await?;

            tracing::debug!(
                source_id,
                level = next_level,
                clusters = clusters.len(),
                "Built summary level"
            );
            levels.insert(next_level, produced.len());
            summaries.extend(produced.iter().cloned());
            current = produced;
            level = next_level;
        }

        let root_id = if level == 0 {
            None
        } else if current.len() == 1 {
            Some(current[0].id.clone())
        } else {
            let root_level = level + 1;
            let root = self
                .summarizer
                .summarize_summaries(&current, root_level, source_id, notebook_id)
                .await;
            let mut root = self.embed_nodes(vec![root]).await?;
            let root = root.remove(0);
            let root_id = root.id.clone();
            levels.insert(root_level, 1);
            summaries.push(root);
            Some(root_id)
        };

        let (summary_nodes, leaf_nodes) = match &root_id {
            Some(root_id) => (
                summaries
                    .into_iter()
                    .map(|node| node.with_tree_root(root_id))
                    .collect(),
                leaves
                    .into_iter()
                    .map(|node| node.with_tree_root(root_id))
                    .collect(),
            ),
            None => (summaries, leaves),
        };

        let max_level = levels.keys().next_back().copied().unwrap_or(0);
        Ok(TreeBuildResult {
            success: true,
            source_id: source_id.to_string(),
            notebook_id: notebook_id.to_string(),
            total_nodes: leaf_nodes.len() + summary_nodes.len(),
            levels,
            max_level,
            summary_nodes,
            leaf_nodes,
            tree_root_id: root_id,
            build_time: started.elapsed(),
            error: None,
        })
    }

    /// Summaries for every cluster, in cluster order, with bounded concurrency.
    async fn summarize_level(
        &self,
        clusters: &[Cluster],
        nodes: &[Node],
        tree_level: u32,
        source_id: &str,
        notebook_id: &str,
    ) -> Vec<Node> {
        // Collected first so the stream holds concrete futures and the build future stays Send.
        let pending: Vec<_> = clusters
            .iter()
            .map(|cluster| {
                self.summarizer
                    .summarize_cluster(cluster, nodes, tree_level, source_id, notebook_id)
            })
            .collect();
        futures_util::stream::iter(pending)
            .buffered(self.config.summary_concurrency.max(1))
            .collect()
            .await
    }

    async fn embed_nodes(&self, nodes: Vec<Node>) -> Result<Vec<Node>, TreeBuildError> {
        if nodes.is_empty() {
            return Ok(nodes);
        }
        let texts = nodes.iter().map(|node| node.text.clone()).collect();
        let vectors = self.embedder.embed_batch(texts).await?;
        if vectors.len() != nodes.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: nodes.len(),
                actual: vectors.len(),
            }
            .into());
        }
        Ok(nodes
            .into_iter()
            .zip(vectors)
            .map(|(node, vector)| node.with_embedding(vector))
            .collect())
    }
}
