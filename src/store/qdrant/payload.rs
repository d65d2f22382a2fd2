//! Conversions between tree nodes and Qdrant points.

use super::types::ScrollPoint;
use crate::node::{Node, NodeType};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Build the payload object stored alongside each node vector.
pub(crate) fn build_payload(node: &Node, timestamp_rfc3339: &str) -> Value {
    let mut payload = Map::new();
    payload.insert("node_id".into(), Value::String(node.id.clone()));
    payload.insert("text".into(), Value::String(node.text.clone()));
    payload.insert("text_hash".into(), Value::String(compute_text_hash(&node.text)));
    payload.insert("notebook_id".into(), Value::String(node.notebook_id.clone()));
    payload.insert("source_id".into(), Value::String(node.source_id.clone()));
    payload.insert("tree_level".into(), json!(node.tree_level));
    payload.insert(
        "node_type".into(),
        Value::String(node.node_type.as_str().to_string()),
    );
    payload.insert(
        "child_node_ids".into(),
        Value::Array(
            node.child_node_ids
                .iter()
                .map(|id| Value::String(id.clone()))
                .collect(),
        ),
    );
    payload.insert(
        "timestamp".into(),
        Value::String(timestamp_rfc3339.to_string()),
    );

    if let Some(cluster_id) = node.cluster_id {
        payload.insert("cluster_id".into(), json!(cluster_id));
    }
    if let Some(root_id) = node.tree_root_id.as_ref().filter(|id| !id.is_empty()) {
        payload.insert("tree_root_id".into(), Value::String(root_id.clone()));
    }
    if let Some(tokens) = node.token_count {
        payload.insert("token_count".into(), json!(tokens));
    }

    Value::Object(payload)
}

/// Rebuild a node from a scrolled point; `None` when required fields are missing.
pub(crate) fn node_from_point(point: ScrollPoint) -> Option<Node> {
    let payload = point.payload?;
    let text = string_field(&payload, "text")?;
    let id = string_field(&payload, "node_id")
        .or_else(|| point.id.map(stringify_point_id))?;
    let tree_level = payload.get("tree_level")?.as_u64()? as u32;
    let node_type = string_field(&payload, "node_type")
        .and_then(|label| label.parse::<NodeType>().ok())
        .unwrap_or(if tree_level == 0 { NodeType::Chunk } else { NodeType::Summary });

    Some(Node {
        id,
        text,
        embedding: point.vector.and_then(parse_vector),
        tree_level,
        source_id: string_field(&payload, "source_id").unwrap_or_default(),
        notebook_id: string_field(&payload, "notebook_id").unwrap_or_default(),
        node_type,
        cluster_id: payload
            .get("cluster_id")
            .and_then(Value::as_u64)
            .map(|value| value as usize),
        child_node_ids: payload
            .get("child_node_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
        tree_root_id: string_field(&payload, "tree_root_id"),
        token_count: payload
            .get("token_count")
            .and_then(Value::as_u64)
            .map(|value| value as usize),
    })
}

/// Qdrant point id for a node: the node id itself when it is a UUID, otherwise a UUID
/// derived from its SHA-256 digest.
pub(crate) fn point_id(node_id: &str) -> String {
    if let Ok(uuid) = Uuid::parse_str(node_id) {
        return uuid.to_string();
    }
    let digest = Sha256::digest(node_id.as_bytes());
    let mut bytes = [0_u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Compute a deterministic SHA-256 hash for node text.
pub fn compute_text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub(crate) fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Object(map) => map
            .get("uuid")
            .map(|value| match value {
                Value::String(uuid) => uuid.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn string_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_vector(value: Value) -> Option<Vec<f32>> {
    let values = match value {
        Value::Array(values) => values,
        // Named vectors: take the first one.
        Value::Object(map) => match map.into_iter().next()?.1 {
            Value::Array(values) => values,
            _ => return None,
        },
        _ => return None,
    };
    values
        .iter()
        .map(|value| value.as_f64().map(|number| number as f32))
        .collect()
}
