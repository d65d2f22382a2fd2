//! Shared types used by the Qdrant client and helpers.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned while interacting with Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Point returned by a scroll page.
#[derive(Debug, Clone, Deserialize)]
pub struct ScrollPoint {
    /// Point identifier (UUID string or integer).
    #[serde(default)]
    pub id: Option<Value>,
    /// Stored payload, when requested.
    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
    /// Stored vector, when requested.
    #[serde(default)]
    pub vector: Option<Value>,
}

/// Options for one scroll traversal.
#[derive(Debug, Clone)]
pub struct ScrollRequest {
    /// Value of the `with_payload` field (`true` or a list of keys).
    pub with_payload: Value,
    /// Whether vectors are returned.
    pub with_vector: bool,
    /// Optional filter object.
    pub filter: Option<Value>,
}

#[derive(Deserialize)]
pub(crate) struct ScrollResponse {
    pub(crate) result: ScrollResult,
}

#[derive(Deserialize)]
pub(crate) struct ScrollResult {
    #[serde(default)]
    pub(crate) points: Vec<ScrollPoint>,
    #[serde(default)]
    pub(crate) next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
pub(crate) struct CountResponse {
    pub(crate) result: CountResult,
}

#[derive(Deserialize)]
pub(crate) struct CountResult {
    pub(crate) count: usize,
}
