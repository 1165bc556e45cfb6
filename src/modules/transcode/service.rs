use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{SubmitResponse, TaskStatusResponse, UploadRequest};
use super::events::TranscodeTask;
use super::model::NewJob;
use crate::common::error::AppError;
use crate::infrastructure::storage::ByteStream;
use crate::metrics;
use crate::state::AppState;

const STAGING_CONTENT_TYPE: &str = "application/octet-stream";

pub struct TranscodeService;

impl TranscodeService {
    /// Reserves the id, stages the upload and hands the job to the queue.
    /// Returns as soon as the broker has confirmed the task.
    ///
    /// The record is created before anything is written to storage, so only
    /// the submission that owns the id ever touches `uploads/{id}`.
    pub async fn submit(
        state: &AppState,
        req: UploadRequest,
        body: ByteStream,
    ) -> Result<SubmitResponse, AppError> {
        let record = state.jobs.create(NewJob::new(req.id, req.webhook_url)).await?;

        match state
            .storage
            .put_stream(&record.source_key, body, STAGING_CONTENT_TYPE)
            .await
        {
            Ok(staged) => info!("📥 Staged {} bytes at {}", staged, record.source_key),
            Err(e) => {
                Self::release(state, &record.id).await;
                return Err(e.into());
            }
        }

        let task = TranscodeTask::new(record.task_id, &record.id, &record.source_key);
        if let Err(e) = state.queue.enqueue(&task).await {
            warn!("Failed to enqueue job {}: {}", record.id, e);
            Self::release(state, &record.id).await;
            Self::discard_staged(state, &record.source_key).await;
            return Err(AppError::StorageUnavailable(format!("task queue: {}", e)));
        }

        metrics::JOBS_SUBMITTED_TOTAL.inc();
        info!("🎬 Job {} queued as task {}", record.id, record.task_id);
        Ok(SubmitResponse::accepted(&record))
    }

    pub async fn status(state: &AppState, task_id: Uuid) -> Result<TaskStatusResponse, AppError> {
        let record = state
            .jobs
            .find_by_task_id(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;

        Ok(record.into())
    }

    /// Frees an id whose job never reached the queue.
    async fn release(state: &AppState, id: &str) {
        match state.jobs.remove_unqueued(id).await {
            Ok(true) => {}
            Ok(false) => warn!("Job {} was no longer QUEUED during rollback", id),
            Err(e) => warn!("Failed to roll back job {}: {}", id, e),
        }
    }

    async fn discard_staged(state: &AppState, key: &str) {
        if let Err(e) = state.storage.delete_object(key).await {
            warn!("Failed to delete staged upload {}: {}", key, e);
        }
    }
}
