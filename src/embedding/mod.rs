//! Text-to-vector capability and its adapters.

use crate::config::{Config, EmbeddingProvider};
use crate::llm::DEFAULT_OLLAMA_URL;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider returned a different number of vectors than texts submitted.
    #[error("Embedding provider returned {actual} vectors for {expected} texts")]
    CountMismatch {
        /// Number of texts submitted.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in order.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Produce an embedding for a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(vec![text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual: vectors.len(),
            });
        }
        Ok(vectors.remove(0))
    }
}

/// Deterministic embedding client that hashes text bytes into a fixed-size vector.
///
/// Useful offline and in tests: identical texts always map to identical unit vectors.
pub struct HashingEmbeddingClient {
    dimension: usize,
}

impl HashingEmbeddingClient {
    /// Construct a client producing vectors of `dimension` components.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbeddingClient {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        tracing::debug!(
            dimension = self.dimension,
            texts = texts.len(),
            "Generating hashing embeddings"
        );

        if self.dimension == 0 {
            return Err(EmbeddingError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        Ok(texts
            .iter()
            .map(|text| Self::encode(text, self.dimension))
            .collect())
    }
}

/// Embedding client backed by the Ollama `/api/embed` endpoint.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbeddingClient {
    /// Build a client for `model` served at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, EmbeddingError> {
        let http = Client::builder()
            .user_agent("raptor-rag/embed")
            .build()
            .map_err(|error| EmbeddingError::GenerationFailed(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let endpoint = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&endpoint)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingError::GenerationFailed(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingError::GenerationFailed(format!("failed to decode Ollama response: {error}"))
        })?;

        if body.embeddings.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                actual: body.embeddings.len(),
            });
        }
        Ok(body.embeddings)
    }
}

/// Build an embedding client suitable for the given configuration.
pub fn embedding_client_from_config(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingError> {
    match config.embedding_provider {
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbeddingClient::new(
            config.embedding_dimension,
        ))),
        EmbeddingProvider::Ollama => {
            let base_url = config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
            Ok(Arc::new(OllamaEmbeddingClient::new(
                base_url,
                config.embedding_model.clone(),
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn hashing_client_is_deterministic_and_normalized() {
        let client = HashingEmbeddingClient::new(16);
        let first = client.embed_one("retrieval tree").await.expect("vector");
        let second = client.embed_one("retrieval tree").await.expect("vector");
        assert_eq!(first, second);
        let norm: f32 = first.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hashing_client_rejects_zero_dimension() {
        let client = HashingEmbeddingClient::new(0);
        assert!(client.embed_batch(vec!["x".into()]).await.is_err());
    }

    #[tokio::test]
    async fn ollama_client_returns_vectors_in_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed").body_contains("\"input\":[\"a\",\"b\"]");
                then.status(200).json_body(json!({
                    "embeddings": [[1.0, 0.0], [0.0, 1.0]]
                }));
            })
            .await;

        let client = OllamaEmbeddingClient::new(server.base_url(), "nomic").expect("client");
        let vectors = client
            .embed_batch(vec!["a".into(), "b".into()])
            .await
            .expect("vectors");

        mock.assert();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn ollama_client_detects_count_mismatch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({ "embeddings": [[1.0]] }));
            })
            .await;

        let client = OllamaEmbeddingClient::new(server.base_url(), "nomic").expect("client");
        let error = client
            .embed_batch(vec!["a".into(), "b".into()])
            .await
            .expect_err("mismatch");
        assert!(matches!(
            error,
            EmbeddingError::CountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }
}
