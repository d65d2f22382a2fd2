//! HTTP client wrapper for interacting with Qdrant.

use super::types::{CountResponse, QdrantError};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

/// Lightweight HTTP client for Qdrant operations.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl QdrantService {
    /// Construct a client for the Qdrant instance at `url`.
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("raptor-rag/0.1").build()?;

        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = %api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Create a collection only when it is missing from Qdrant.
    pub async fn create_collection_if_not_exists(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        if self.collection_exists(collection_name).await? {
            return Ok(());
        }

        tracing::debug!(
            collection = collection_name,
            vector_size,
            "Creating collection"
        );
        self.create_collection(collection_name, vector_size).await
    }

    /// Create or update a collection with the specified vector size.
    pub async fn create_collection(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}"))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Collection ensured/created");
        })
        .await
    }

    /// Upsert prepared points (`{id, vector, payload}` objects).
    pub async fn upsert_points(
        &self,
        collection_name: &str,
        points: Vec<Value>,
    ) -> Result<usize, QdrantError> {
        if points.is_empty() {
            return Ok(0);
        }

        let point_count = points.len();
        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}/points"))
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = collection_name,
                points = point_count,
                "Points upserted"
            );
        })
        .await?;

        Ok(point_count)
    }

    /// Exact number of points matching `filter`.
    pub async fn count_points(
        &self,
        collection_name: &str,
        filter: Value,
    ) -> Result<usize, QdrantError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/count"),
            )
            .json(&json!({ "filter": filter, "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = collection_name, error = %error, "Qdrant count failed");
            return Err(error);
        }

        let CountResponse { result } = response.json().await?;
        Ok(result.count)
    }

    /// Delete every point matching `filter`.
    pub async fn delete_points(&self, collection_name: &str, filter: Value) -> Result<(), QdrantError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/delete"),
            )
            .query(&[("wait", true)])
            .json(&json!({ "filter": filter }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Points deleted by filter");
        })
        .await
    }

    /// Ensure payload indexes exist for the fields tree queries filter on.
    pub async fn ensure_payload_indexes(&self, collection_name: &str) -> Result<(), QdrantError> {
        let fields: [(&str, &str); 6] = [
            ("notebook_id", "keyword"),
            ("source_id", "keyword"),
            ("tree_level", "integer"),
            ("node_type", "keyword"),
            ("text_hash", "keyword"),
            ("timestamp", "datetime"),
        ];

        for (field, schema) in fields {
            let body = json!({
                "field_name": field,
                "field_schema": schema,
            });

            let response = self
                .request(Method::PUT, &format!("collections/{collection_name}/index"))
                .json(&body)
                .send()
                .await?;

            if response.status().is_success() {
                tracing::debug!(
                    collection = collection_name,
                    field,
                    schema,
                    "Payload index ensured"
                );
            } else if response.status() == StatusCode::CONFLICT {
                tracing::debug!(
                    collection = collection_name,
                    field,
                    schema,
                    "Payload index already exists"
                );
            } else {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::warn!(collection = collection_name, field, schema, error = %error, "Failed to ensure payload index");
            }
        }

        Ok(())
    }

    async fn collection_exists(&self, collection_name: &str) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection_name}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = collection_name, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{GET, POST, PUT},
        MockServer,
    };

    fn service_for(server: &MockServer) -> QdrantService {
        QdrantService::new(&server.base_url(), Some("secret".into())).expect("client")
    }

    #[test]
    fn rejects_invalid_url() {
        assert!(matches!(
            QdrantService::new("not a url", None),
            Err(QdrantError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn count_points_sends_exact_filter() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/demo/points/count")
                    .header("api-key", "secret")
                    .body_contains("\"exact\":true");
                then.status(200).json_body(json!({ "result": { "count": 7 } }));
            })
            .await;

        let count = service_for(&server)
            .count_points("demo", json!({ "must": [] }))
            .await
            .expect("count");

        mock.assert();
        assert_eq!(count, 7);
    }

    #[tokio::test]
    async fn missing_collection_is_created() {
        let server = MockServer::start_async().await;
        let exists = server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/demo");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/demo")
                    .body_contains("\"size\":8");
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;

        service_for(&server)
            .create_collection_if_not_exists("demo", 8)
            .await
            .expect("created");

        exists.assert();
        create.assert();
    }

    #[tokio::test]
    async fn delete_failure_surfaces_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/demo/points/delete");
                then.status(500).body("boom");
            })
            .await;

        let error = service_for(&server)
            .delete_points("demo", json!({ "must": [] }))
            .await
            .expect_err("failure");

        assert!(matches!(
            error,
            QdrantError::UnexpectedStatus { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
    }
}
