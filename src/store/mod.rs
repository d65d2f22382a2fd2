//! Persistence seams for tree nodes and source build status.
//!
//! [`TreeStore`] holds nodes of every level and answers per-level queries; the Qdrant-backed
//! implementation is used in production and [`InMemoryTreeStore`] in tests and offline runs.
//! [`SourceStatusStore`] records the build lifecycle of each source.

pub mod memory;
pub mod qdrant;
pub mod status;

use crate::node::Node;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

pub use memory::InMemoryTreeStore;
pub use qdrant::{QdrantError, QdrantService, QdrantTreeStore};
pub use status::{
    InMemorySourceStatusStore, SourceRecord, SourceStatus, SourceStatusStore, SourceStatusUpdate,
};

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The Qdrant backend failed.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// A status update referenced a source the store does not know.
    #[error("Unknown source: {0}")]
    UnknownSource(String),
    /// The store could not be reached or its state is unusable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Node counts of one source's tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    /// Node count per level.
    pub levels: BTreeMap<u32, usize>,
    /// Highest level with at least one node.
    pub max_level: u32,
    /// Whether any summary level exists.
    pub has_tree: bool,
}

impl TreeStats {
    /// Derive stats from per-level counts.
    pub fn from_levels(levels: BTreeMap<u32, usize>) -> Self {
        let max_level = levels
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(level, _)| *level)
            .next_back()
            .unwrap_or(0);
        Self {
            levels,
            max_level,
            has_tree: max_level > 0,
        }
    }
}

/// Storage of tree nodes, queried by notebook and level.
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Nodes of `notebook_id` at `level`, optionally restricted to `source_ids`.
    async fn get_nodes_by_tree_level(
        &self,
        notebook_id: &str,
        level: u32,
        source_ids: Option<&[String]>,
    ) -> Result<Vec<Node>, StoreError>;

    /// Store `nodes` at `level` for the source, stamping the root id when given.
    ///
    /// Returns the number of nodes written.
    async fn add_tree_nodes(
        &self,
        nodes: &[Node],
        notebook_id: &str,
        source_id: &str,
        level: u32,
        tree_root_id: Option<&str>,
    ) -> Result<usize, StoreError>;

    /// Per-level node counts for the source.
    async fn get_tree_stats(&self, source_id: &str) -> Result<TreeStats, StoreError>;

    /// Delete the source's nodes at `min_level` and above; returns the number removed.
    async fn delete_tree_nodes(&self, source_id: &str, min_level: u32) -> Result<usize, StoreError>;

    /// Whether the source has any summary levels.
    async fn has_tree(&self, source_id: &str) -> Result<bool, StoreError> {
        Ok(self.get_tree_stats(source_id).await?.has_tree)
    }
}
