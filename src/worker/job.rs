//! Processing of one build job: load chunks, build, persist, record status.

use super::WorkerShared;
use super::queue::Job;
use crate::store::{SourceStatusUpdate, StoreError};
use crate::summarizer::Summarizer;
use crate::tree::{TreeBuilder, persist_tree};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

/// Why a job did not complete.
#[derive(Debug, Error)]
pub(crate) enum JobError {
    #[error("No {0} capability configured")]
    MissingCapability(&'static str),
    #[error("Failed to load chunks: {0}")]
    Load(StoreError),
    #[error("No chunks found for source")]
    NoChunks,
    #[error("Tree build timed out after {0:?}")]
    Timeout(Duration),
    #[error("Tree build failed: {0}")]
    Build(String),
    #[error("Failed to persist tree: {0}")]
    Persist(StoreError),
}

pub(crate) async fn process_job(shared: &WorkerShared, job: &Job) {
    tracing::info!(
        source_id = %job.source_id,
        notebook_id = %job.notebook_id,
        file_name = %job.file_name,
        "Processing tree build job"
    );

    if let Err(error) = shared
        .status_store
        .set_status(&job.source_id, SourceStatusUpdate::building())
        .await
    {
        tracing::warn!(source_id = %job.source_id, %error, "Failed to mark source as building");
    }

    match build_and_persist(shared, job).await {
        Ok(persisted) => {
            shared.metrics.record_success(persisted as u64);
            let update = SourceStatusUpdate::completed(OffsetDateTime::now_utc());
            if let Err(error) = shared.status_store.set_status(&job.source_id, update).await {
                tracing::error!(source_id = %job.source_id, %error, "Failed to mark source as completed");
            } else {
                tracing::info!(source_id = %job.source_id, persisted, "Tree build job completed");
            }
        }
        Err(error @ JobError::Persist(_)) => {
            // Status stays at the last value written (building).
            tracing::error!(source_id = %job.source_id, %error, "Tree persistence failed");
        }
        Err(error) => {
            shared.metrics.record_failure();
            tracing::warn!(source_id = %job.source_id, %error, "Tree build job failed");
            let update = SourceStatusUpdate::failed(error.to_string());
            if let Err(store_error) = shared.status_store.set_status(&job.source_id, update).await {
                tracing::error!(source_id = %job.source_id, error = %store_error, "Failed to mark source as failed");
            }
        }
    }
}

async fn build_and_persist(shared: &WorkerShared, job: &Job) -> Result<usize, JobError> {
    let llm = shared
        .llm
        .clone()
        .ok_or(JobError::MissingCapability("LLM"))?;
    let embedder = shared
        .embedder
        .clone()
        .ok_or(JobError::MissingCapability("embedding"))?;

    let source_ids = [job.source_id.clone()];
    let chunks = shared
        .tree_store
        .get_nodes_by_tree_level(&job.notebook_id, 0, Some(&source_ids))
        .await
        .map_err(JobError::Load)?;
    if chunks.is_empty() {
        return Err(JobError::NoChunks);
    }

    let builder = TreeBuilder::new(
        &shared.config,
        Summarizer::new(llm, shared.config.summarizer.clone()),
        embedder,
    );
    let build = builder.build_tree(chunks, &job.source_id, &job.notebook_id);
    let result = match shared.config.worker.job_timeout() {
        Some(limit) => tokio::time::timeout(limit, build)
            .await
            .map_err(|_| JobError::Timeout(limit))?,
        None => build.await,
    };

    if !result.success {
        return Err(JobError::Build(
            result.error.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    persist_tree(shared.tree_store.as_ref(), &result)
        .await
        .map_err(JobError::Persist)
}
