//! Durable build status of each source.

use super::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use time::OffsetDateTime;

/// Build lifecycle state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    /// Waiting for a build.
    Pending,
    /// A build is running.
    Building,
    /// The last build succeeded.
    Completed,
    /// The last build failed; stays failed until re-enqueued.
    Failed,
}

impl SourceStatus {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Source metadata relevant to tree builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Source identifier.
    pub source_id: String,
    /// Notebook the source belongs to.
    pub notebook_id: String,
    /// Original file name, for logs.
    pub file_name: String,
    /// Current lifecycle state.
    pub status: SourceStatus,
    /// Failure description for failed builds.
    pub error: Option<String>,
    /// Completion time of the last successful build.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub built_at: Option<OffsetDateTime>,
}

impl SourceRecord {
    /// A source waiting for its first build.
    pub fn pending(
        source_id: impl Into<String>,
        notebook_id: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            notebook_id: notebook_id.into(),
            file_name: file_name.into(),
            status: SourceStatus::Pending,
            error: None,
            built_at: None,
        }
    }
}

/// Status transition written by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStatusUpdate {
    /// New state.
    pub status: SourceStatus,
    /// Error text; cleared when `None`.
    pub error: Option<String>,
    /// Build completion time; kept when `None`.
    pub built_at: Option<OffsetDateTime>,
}

impl SourceStatusUpdate {
    /// Move to [`SourceStatus::Building`].
    pub fn building() -> Self {
        Self {
            status: SourceStatus::Building,
            error: None,
            built_at: None,
        }
    }

    /// Move to [`SourceStatus::Completed`] at `built_at`.
    pub fn completed(built_at: OffsetDateTime) -> Self {
        Self {
            status: SourceStatus::Completed,
            error: None,
            built_at: Some(built_at),
        }
    }

    /// Move to [`SourceStatus::Failed`] with the error text.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: SourceStatus::Failed,
            error: Some(error.into()),
            built_at: None,
        }
    }
}

/// Storage for per-source build status.
#[async_trait]
pub trait SourceStatusStore: Send + Sync {
    /// Up to `limit` sources currently pending.
    async fn list_pending(&self, limit: usize) -> Result<Vec<SourceRecord>, StoreError>;

    /// Record for `source_id`, when known.
    async fn get(&self, source_id: &str) -> Result<Option<SourceRecord>, StoreError>;

    /// Apply a status transition.
    async fn set_status(&self, source_id: &str, update: SourceStatusUpdate) -> Result<(), StoreError>;
}

/// Status store backed by a process-local map.
#[derive(Debug, Default)]
pub struct InMemorySourceStatusStore {
    records: Mutex<BTreeMap<String, SourceRecord>>,
}

impl InMemorySourceStatusStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: SourceRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(record.source_id.clone(), record);
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("status store lock poisoned".into())
    }
}

#[async_trait]
impl SourceStatusStore for InMemorySourceStatusStore {
    async fn list_pending(&self, limit: usize) -> Result<Vec<SourceRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| Self::poisoned())?;
        Ok(records
            .values()
            .filter(|record| record.status == SourceStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get(&self, source_id: &str) -> Result<Option<SourceRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| Self::poisoned())?;
        Ok(records.get(source_id).cloned())
    }

    async fn set_status(&self, source_id: &str, update: SourceStatusUpdate) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| Self::poisoned())?;
        let record = records
            .get_mut(source_id)
            .ok_or_else(|| StoreError::UnknownSource(source_id.to_string()))?;

        record.status = update.status;
        record.error = update.error;
        if update.built_at.is_some() {
            record.built_at = update.built_at;
        }
        tracing::debug!(source_id, status = update.status.as_str(), "Source status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_pending_respects_limit_and_status() {
        let store = InMemorySourceStatusStore::new();
        for i in 0..4 {
            store.insert(SourceRecord::pending(format!("s{i}"), "nb", "f.pdf"));
        }
        store.set_status("s1", SourceStatusUpdate::building()).await.unwrap();

        let pending = store.list_pending(2).await.unwrap();

        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|record| record.status == SourceStatus::Pending));
        assert!(pending.iter().all(|record| record.source_id != "s1"));
    }

    #[tokio::test]
    async fn failure_then_completion_clears_error() {
        let store = InMemorySourceStatusStore::new();
        store.insert(SourceRecord::pending("s", "nb", "f.pdf"));

        store.set_status("s", SourceStatusUpdate::failed("boom")).await.unwrap();
        let failed = store.get("s").await.unwrap().unwrap();
        assert_eq!(failed.status, SourceStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));

        let now = OffsetDateTime::now_utc();
        store.set_status("s", SourceStatusUpdate::completed(now)).await.unwrap();
        let done = store.get("s").await.unwrap().unwrap();
        assert_eq!(done.status, SourceStatus::Completed);
        assert!(done.error.is_none());
        assert_eq!(done.built_at, Some(now));
    }

    #[tokio::test]
    async fn unknown_source_is_reported() {
        let store = InMemorySourceStatusStore::new();
        let error = store
            .set_status("missing", SourceStatusUpdate::building())
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::UnknownSource(id) if id == "missing"));
    }
}
