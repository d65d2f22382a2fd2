//! Filter helpers for tree node queries.

use serde_json::{Value, json};

/// Constraints applied to tree node scrolls, counts, and deletes.
#[derive(Debug, Default, Clone)]
pub struct TreeFilter<'a> {
    /// Exact match on `notebook_id`.
    pub notebook_id: Option<&'a str>,
    /// Exact match on `source_id`.
    pub source_id: Option<&'a str>,
    /// Match-any on `source_id`.
    pub source_ids: Option<&'a [String]>,
    /// Exact match on `tree_level`.
    pub tree_level: Option<u32>,
    /// Lower bound (inclusive) on `tree_level`.
    pub min_level: Option<u32>,
}

/// Compose the Qdrant filter object for the given constraints.
pub fn build_tree_filter(filter: &TreeFilter<'_>) -> Value {
    let mut must: Vec<Value> = Vec::new();

    if let Some(notebook_id) = filter.notebook_id.and_then(non_empty) {
        must.push(json!({
            "key": "notebook_id",
            "match": { "value": notebook_id }
        }));
    }

    if let Some(source_id) = filter.source_id.and_then(non_empty) {
        must.push(json!({
            "key": "source_id",
            "match": { "value": source_id }
        }));
    }

    if let Some(source_ids) = filter.source_ids {
        let cleaned: Vec<&str> = source_ids.iter().filter_map(|id| non_empty(id)).collect();
        must.push(json!({
            "key": "source_id",
            "match": { "any": cleaned }
        }));
    }

    if let Some(level) = filter.tree_level {
        must.push(json!({
            "key": "tree_level",
            "match": { "value": level }
        }));
    }

    if let Some(min_level) = filter.min_level {
        must.push(json!({
            "key": "tree_level",
            "range": { "gte": min_level }
        }));
    }

    json!({ "must": must })
}

fn non_empty(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}
