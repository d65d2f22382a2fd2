//! Streaming helper for iterating Qdrant scroll endpoints without manual loops.

use async_stream::try_stream;
use futures_core::Stream;
use reqwest::Method;
use serde_json::{Value, json};

use super::client::QdrantService;
use super::types::{QdrantError, ScrollPoint, ScrollRequest, ScrollResponse};

const DEFAULT_SCROLL_LIMIT: usize = 256;

/// Stream every point matching the request, following `next_page_offset`.
pub fn stream_points<'a>(
    service: &'a QdrantService,
    collection: &'a str,
    request: ScrollRequest,
) -> impl Stream<Item = Result<ScrollPoint, QdrantError>> + 'a {
    try_stream! {
        let mut offset: Option<Value> = None;
        let filter_body = request.filter.unwrap_or_else(|| json!({ "must": [] }));

        loop {
            let body = json!({
                "with_payload": request.with_payload.clone(),
                "with_vector": request.with_vector,
                "limit": DEFAULT_SCROLL_LIMIT,
                "filter": filter_body.clone(),
                "offset": offset.clone().unwrap_or(Value::Null),
            });

            let response = service
                .request(Method::POST, &format!("collections/{collection}/points/scroll"))
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                let ScrollResponse { result } = response.json().await?;
                for point in result.points {
                    yield point;
                }

                match result.next_page_offset {
                    Some(next) if !next.is_null() => offset = Some(next),
                    _ => break,
                }
            } else {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(collection = collection, status = %status, "Failed to scroll points via stream");
                Err(QdrantError::UnexpectedStatus { status, body })?;
            }
        }
    }
}
