//! Process-local tree store.

use super::{StoreError, TreeStats, TreeStore};
use crate::node::Node;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Tree store keeping every node in memory, in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryTreeStore {
    nodes: RwLock<Vec<Node>>,
}

impl InMemoryTreeStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().map(|nodes| nodes.len()).unwrap_or(0)
    }

    /// Whether the store holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("in-memory tree store lock poisoned".into())
    }
}

#[async_trait]
impl TreeStore for InMemoryTreeStore {
    async fn get_nodes_by_tree_level(
        &self,
        notebook_id: &str,
        level: u32,
        source_ids: Option<&[String]>,
    ) -> Result<Vec<Node>, StoreError> {
        let nodes = self.nodes.read().map_err(|_| Self::poisoned())?;
        Ok(nodes
            .iter()
            .filter(|node| node.notebook_id == notebook_id && node.tree_level == level)
            .filter(|node| source_ids.is_none_or(|ids| ids.contains(&node.source_id)))
            .cloned()
            .collect())
    }

    async fn add_tree_nodes(
        &self,
        nodes: &[Node],
        notebook_id: &str,
        source_id: &str,
        level: u32,
        tree_root_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        let mut stored = self.nodes.write().map_err(|_| Self::poisoned())?;
        for node in nodes {
            let mut node = Node {
                notebook_id: notebook_id.to_string(),
                source_id: source_id.to_string(),
                tree_level: level,
                ..node.clone()
            };
            if let Some(root_id) = tree_root_id {
                node = node.with_tree_root(root_id);
            }

            match stored.iter_mut().find(|existing| existing.id == node.id) {
                Some(existing) => *existing = node,
                None => stored.push(node),
            }
        }
        tracing::debug!(source_id, level, nodes = nodes.len(), "Stored tree nodes in memory");
        Ok(nodes.len())
    }

    async fn get_tree_stats(&self, source_id: &str) -> Result<TreeStats, StoreError> {
        let nodes = self.nodes.read().map_err(|_| Self::poisoned())?;
        let mut levels = BTreeMap::new();
        for node in nodes.iter().filter(|node| node.source_id == source_id) {
            *levels.entry(node.tree_level).or_insert(0) += 1;
        }
        Ok(TreeStats::from_levels(levels))
    }

    async fn delete_tree_nodes(&self, source_id: &str, min_level: u32) -> Result<usize, StoreError> {
        let mut nodes = self.nodes.write().map_err(|_| Self::poisoned())?;
        let before = nodes.len();
        nodes.retain(|node| !(node.source_id == source_id && node.tree_level >= min_level));
        Ok(before - nodes.len())
    }
}
