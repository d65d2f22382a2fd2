//! Prompt-completion capability used for summaries, intent detection, and query variations.
//!
//! Every caller in this crate treats completion as optional: summaries fall back to extractive
//! text, intent detection falls back to detail mode, and a failed query expansion drops hybrid
//! retrieval back to vector ranking. The Ollama-backed client issues HTTP requests directly to the runtime.

use crate::config::Config;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Default Ollama endpoint used when no URL is configured.
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Errors surfaced while requesting a completion.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider was unreachable or not configured.
    #[error("LLM provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by completion providers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete the prompt and return the generated text.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Completion client talking to a local Ollama runtime.
pub struct OllamaLlmClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaLlmClient {
    /// Build a client for `model` served at `base_url`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        let http = Client::builder()
            .user_agent("raptor-rag/llm")
            .build()
            .map_err(|error| LlmError::ProviderUnavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl LlmClient for OllamaLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                // Lower temperature for deterministic summaries.
                "temperature": 0.1,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                LlmError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LlmError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            LlmError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(LlmError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

/// Build the completion client described by `config`, or `None` when no model is configured.
pub fn llm_client_from_config(config: &Config) -> Result<Option<Arc<dyn LlmClient>>, LlmError> {
    let Some(model) = config.llm_model.clone() else {
        return Ok(None);
    };
    let base_url = config
        .ollama_url
        .clone()
        .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
    Ok(Some(Arc::new(OllamaLlmClient::new(base_url, model)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn client_for(server: &MockServer) -> OllamaLlmClient {
        OllamaLlmClient::new(server.base_url(), "llama").expect("client")
    }

    #[tokio::test]
    async fn ollama_client_handles_successful_response() {
        let server = MockServer::start_async().await;
        let client = client_for(&server);

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .body_contains("\"model\":\"llama\"");
                then.status(200).json_body(json!({
                    "response": "  Summary text \n",
                    "done": true
                }));
            })
            .await;

        let text = client.complete("Summarize").await.expect("completion");

        mock.assert();
        assert_eq!(text, "Summary text");
    }

    #[tokio::test]
    async fn ollama_client_handles_error_status() {
        let server = MockServer::start_async().await;
        let client = client_for(&server);

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let error = client.complete("Summarize").await.expect_err("error response");

        assert!(matches!(error, LlmError::GenerationFailed(message) if message.contains("500")));
    }

    #[tokio::test]
    async fn ollama_client_rejects_incomplete_response() {
        let server = MockServer::start_async().await;
        let client = client_for(&server);

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).json_body(json!({ "response": "partial", "done": false }));
            })
            .await;

        let error = client.complete("Summarize").await.expect_err("incomplete");
        assert!(matches!(error, LlmError::InvalidResponse(_)));
    }
}
