//! Qdrant-backed tree store.
//!
//! Every node is one point: the vector is the node embedding and the payload carries the
//! tree fields (`node_id`, `notebook_id`, `source_id`, `tree_level`, `node_type`,
//! `cluster_id`, `child_node_ids`, `tree_root_id`, `token_count`) plus `text`, `text_hash`, and
//! `timestamp`.

pub mod client;
pub mod filters;
pub mod payload;
/// Streaming helpers for Qdrant scroll pagination.
pub mod scroller;
pub mod types;

use super::{StoreError, TreeStats, TreeStore};
use crate::node::Node;
use async_trait::async_trait;
use futures_util::{StreamExt, pin_mut};
use serde_json::json;
use std::collections::BTreeMap;

pub use client::QdrantService;
pub use filters::{TreeFilter, build_tree_filter};
pub use payload::compute_text_hash;
pub use types::{QdrantError, ScrollPoint, ScrollRequest};

/// [`TreeStore`] persisting nodes in one Qdrant collection.
pub struct QdrantTreeStore {
    service: QdrantService,
    collection: String,
}

impl QdrantTreeStore {
    /// Store writing to `collection` through `service`.
    pub fn new(service: QdrantService, collection: impl Into<String>) -> Self {
        Self {
            service,
            collection: collection.into(),
        }
    }

    /// Create the collection and payload indexes when missing.
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<(), StoreError> {
        self.service
            .create_collection_if_not_exists(&self.collection, vector_size)
            .await?;
        self.service.ensure_payload_indexes(&self.collection).await?;
        Ok(())
    }

    async fn scroll(&self, request: ScrollRequest) -> Result<Vec<ScrollPoint>, StoreError> {
        let stream = scroller::stream_points(&self.service, &self.collection, request);
        pin_mut!(stream);
        let mut points = Vec::new();
        while let Some(point) = stream.next().await {
            points.push(point?);
        }
        Ok(points)
    }
}

#[async_trait]
impl TreeStore for QdrantTreeStore {
    async fn get_nodes_by_tree_level(
        &self,
        notebook_id: &str,
        level: u32,
        source_ids: Option<&[String]>,
    ) -> Result<Vec<Node>, StoreError> {
        let filter = build_tree_filter(&TreeFilter {
            notebook_id: Some(notebook_id),
            source_ids,
            tree_level: Some(level),
            ..Default::default()
        });
        let points = self
            .scroll(ScrollRequest {
                with_payload: json!(true),
                with_vector: true,
                filter: Some(filter),
            })
            .await?;

        let total = points.len();
        let nodes: Vec<Node> = points
            .into_iter()
            .filter_map(payload::node_from_point)
            .collect();
        if nodes.len() < total {
            tracing::warn!(
                collection = %self.collection,
                skipped = total - nodes.len(),
                "Skipped points without tree payload"
            );
        }
        tracing::debug!(notebook_id, level, nodes = nodes.len(), "Loaded tree level");
        Ok(nodes)
    }

    async fn add_tree_nodes(
        &self,
        nodes: &[Node],
        notebook_id: &str,
        source_id: &str,
        level: u32,
        tree_root_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        let now = payload::current_timestamp_rfc3339();
        let mut points = Vec::with_capacity(nodes.len());

        for node in nodes {
            let Some(vector) = node.embedding.as_ref().filter(|vector| !vector.is_empty()) else {
                tracing::warn!(node_id = %node.id, source_id, level, "Skipping node without embedding");
                continue;
            };
            let mut stored = Node {
                notebook_id: notebook_id.to_string(),
                source_id: source_id.to_string(),
                tree_level: level,
                ..node.clone()
            };
            if let Some(root_id) = tree_root_id {
                stored = stored.with_tree_root(root_id);
            }
            points.push(json!({
                "id": payload::point_id(&stored.id),
                "vector": vector,
                "payload": payload::build_payload(&stored, &now),
            }));
        }

        let written = self.service.upsert_points(&self.collection, points).await?;
        tracing::info!(source_id, level, nodes = written, "Persisted tree nodes");
        Ok(written)
    }

    async fn get_tree_stats(&self, source_id: &str) -> Result<TreeStats, StoreError> {
        let filter = build_tree_filter(&TreeFilter {
            source_id: Some(source_id),
            ..Default::default()
        });
        let points = self
            .scroll(ScrollRequest {
                with_payload: json!(["tree_level"]),
                with_vector: false,
                filter: Some(filter),
            })
            .await?;

        let mut levels = BTreeMap::new();
        for point in points {
            let level = point
                .payload
                .as_ref()
                .and_then(|payload| payload.get("tree_level"))
                .and_then(serde_json::Value::as_u64);
            if let Some(level) = level {
                *levels.entry(level as u32).or_insert(0) += 1;
            }
        }
        Ok(TreeStats::from_levels(levels))
    }

    async fn delete_tree_nodes(&self, source_id: &str, min_level: u32) -> Result<usize, StoreError> {
        let filter = build_tree_filter(&TreeFilter {
            source_id: Some(source_id),
            min_level: Some(min_level),
            ..Default::default()
        });

        let count = self.service.count_points(&self.collection, filter.clone()).await?;
        if count == 0 {
            return Ok(0);
        }
        self.service.delete_points(&self.collection, filter).await?;
        tracing::info!(source_id, min_level, deleted = count, "Deleted tree nodes");
        Ok(count)
    }
}
