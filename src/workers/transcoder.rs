//! Queue-driven worker pool that turns staged uploads into published HLS
//! renditions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::infrastructure::queue::{QueuedTask, TaskQueue};
use crate::infrastructure::storage::{ObjectStore, StorageError};
use crate::infrastructure::webhook::Notifier;
use crate::metrics;
use crate::modules::transcode::events::WebhookPayload;
use crate::modules::transcode::model::{JobRecord, JobState, MediaKind, artifact_prefix, progress};
use crate::modules::transcode::repository::{JobStore, JobStoreError};
use crate::state::AppState;
use crate::workers::ffmpeg::{MediaConverter, TranscodeError};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_count: usize,
    /// Upper bound on deliveries of one job before it is dead-lettered.
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub retry_delay: Duration,
    pub scratch_dir: Option<PathBuf>,
}

/// Handles shared by every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub jobs: Arc<dyn JobStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub converter: Arc<dyn MediaConverter>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: WorkerSettings,
}

impl WorkerContext {
    pub fn from_state(
        state: &AppState,
        converter: Arc<dyn MediaConverter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            jobs: state.jobs.clone(),
            storage: state.storage.clone(),
            queue: state.queue.clone(),
            converter,
            notifier,
            settings: state.config.worker_settings(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source object {0} not found")]
    SourceMissing(String),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("job store: {0}")]
    JobStore(#[from] JobStoreError),

    #[error("scratch directory: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("worker task panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    /// Terminal errors fail the job; everything else is retried via the queue.
    pub fn is_terminal(&self) -> bool {
        match self {
            PipelineError::SourceMissing(_) => true,
            PipelineError::Transcode(e) => e.is_rejection(),
            _ => false,
        }
    }

    pub fn diagnostic(&self) -> String {
        match self {
            PipelineError::Transcode(e) => e.diagnostic(),
            other => other.to_string(),
        }
    }
}

/// What a worker did with one queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Completed(JobState),
    /// Record missing, already terminal, or admitted under another task id.
    Skipped,
    Retried,
    DeadLettered,
}

pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
}

impl WorkerPool {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn spawn(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let count = self.ctx.settings.worker_count;
        info!("🎥 Starting {} transcode workers", count);

        (0..count)
            .map(|worker| {
                let ctx = self.ctx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(run_worker(worker, ctx, shutdown))
            })
            .collect()
    }
}

/// Polls the queue until `shutdown` fires. An item already taken is always
/// processed to the end.
pub async fn run_worker(worker: usize, ctx: Arc<WorkerContext>, shutdown: CancellationToken) {
    debug!("Worker {} listening", worker);

    while !shutdown.is_cancelled() {
        match ctx.queue.dequeue().await {
            Ok(Some(item)) => {
                let span = info_span!(
                    "job",
                    worker,
                    job_id = %item.task.id,
                    task_id = %item.task.task_id
                );
                let outcome = handle_item(&ctx, item).instrument(span).await;
                debug!("Worker {} finished item: {:?}", worker, outcome);
            }
            Ok(None) => idle(&shutdown, ctx.settings.poll_interval).await,
            Err(e) => {
                error!("Worker {} failed to dequeue: {}", worker, e);
                idle(&shutdown, ctx.settings.poll_interval * 5).await;
            }
        }
    }

    info!("Worker {} stopped", worker);
}

async fn idle(shutdown: &CancellationToken, period: Duration) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(period) => {}
    }
}

pub async fn handle_item(ctx: &Arc<WorkerContext>, item: QueuedTask) -> ItemOutcome {
    let task = &item.task;

    let record = match ctx.jobs.begin_attempt(&task.id, task.task_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            info!("Job {} is finished or unknown, dropping delivery", task.id);
            ack(ctx, &item).await;
            return ItemOutcome::Skipped;
        }
        Err(e) => return reschedule(ctx, &item, &format!("job store: {}", e)).await,
    };

    let attempts = u32::try_from(record.attempts).unwrap_or(u32::MAX);
    if attempts > ctx.settings.max_attempts {
        let reason = format!("job was started {} times without finishing", attempts - 1);
        return poison(ctx, &item, attempts - 1, &reason).await;
    }

    if item.redelivered {
        warn!("Job {} redelivered, attempt {}", record.id, attempts);
    }
    info!("⚙️ Processing job {} (attempt {})", record.id, attempts);

    // Panics stay inside the spawned task; the scratch directory is dropped with it.
    let result = match tokio::spawn(run_pipeline(ctx.clone(), record.clone())).await {
        Ok(result) => result,
        Err(join) => Err(PipelineError::Panicked(join.to_string())),
    };

    match result {
        Ok(prefix) => {
            let committed = ctx.jobs.mark_succeeded(&record.id, &prefix).await;
            finish(ctx, &item, committed).await
        }
        Err(e) if e.is_terminal() => {
            warn!("Job {} failed: {}", record.id, e);
            // FAILED is only committed once nothing is left under the prefix.
            if let Err(clear) = clear_outputs(ctx, &record.id).await {
                return reschedule(ctx, &item, &format!("could not clear outputs: {}", clear)).await;
            }
            let committed = ctx
                .jobs
                .mark_failed(&record.id, record.task_id, &e.diagnostic())
                .await;
            finish(ctx, &item, committed).await
        }
        Err(e) => {
            warn!("Job {} hit an infrastructure error: {}", record.id, e);
            reschedule(ctx, &item, &e.to_string()).await
        }
    }
}

/// Download, convert and publish. Returns the artifact prefix.
async fn run_pipeline(ctx: Arc<WorkerContext>, record: JobRecord) -> Result<String, PipelineError> {
    let scratch = scratch_dir(ctx.settings.scratch_dir.as_deref()).await?;
    let source = scratch.path().join(format!("{}-source", record.id));
    let output_dir = scratch.path().join("out");
    tokio::fs::create_dir_all(&output_dir)
        .await
        .map_err(PipelineError::Scratch)?;

    let bytes = match ctx.storage.download_to_file(&record.source_key, &source).await {
        Err(StorageError::NotFound(key)) => return Err(PipelineError::SourceMissing(key)),
        other => other?,
    };
    debug!("⬇️ Downloaded {} bytes from {}", bytes, record.source_key);

    ctx.jobs.set_progress(&record.id, progress::CONVERTING).await?;
    let output = ctx.converter.convert(&source, &output_dir, &record.id).await?;
    metrics::TRANSCODE_DURATION.observe(output.elapsed.as_secs_f64());

    ctx.jobs.set_progress(&record.id, progress::PUBLISHING).await?;
    let prefix = artifact_prefix(&record.id);
    // Segments go up before the playlist that references them.
    let (playlists, segments): (Vec<_>, Vec<_>) =
        output.files.iter().partition(|file| **file == output.playlist);
    for file in segments.into_iter().chain(playlists) {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let key = format!("{}{}", prefix, name);
        ctx.storage
            .put_file(&key, file, MediaKind::from_filename(name).content_type())
            .await?;
    }

    info!("⬆️ Published {} files under {}", output.files.len(), prefix);
    Ok(prefix)
}

async fn scratch_dir(root: Option<&std::path::Path>) -> Result<tempfile::TempDir, PipelineError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("transcode-");

    let dir = match root {
        Some(root) => {
            tokio::fs::create_dir_all(root)
                .await
                .map_err(PipelineError::Scratch)?;
            builder.tempdir_in(root)
        }
        None => builder.tempdir(),
    };
    dir.map_err(PipelineError::Scratch)
}

/// Wraps up after a terminal transition attempt.
async fn finish(
    ctx: &Arc<WorkerContext>,
    item: &QueuedTask,
    committed: Result<Option<JobRecord>, JobStoreError>,
) -> ItemOutcome {
    let record = match committed {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!("Job {} left RUNNING before this worker finished it", item.task.id);
            ack(ctx, item).await;
            return ItemOutcome::Skipped;
        }
        Err(e) => return reschedule(ctx, item, &format!("job store: {}", e)).await,
    };

    let outcome = match record.state {
        JobState::Succeeded => "succeeded",
        _ => "failed",
    };
    metrics::JOBS_FINISHED_TOTAL.with_label_values(&[outcome]).inc();
    info!("✅ Job {} {}", record.id, outcome);

    if let Err(e) = ctx.storage.delete_object(&record.source_key).await {
        warn!("Failed to remove staged upload {}: {}", record.source_key, e);
    }

    deliver_webhook(ctx, &record).await;
    ack(ctx, item).await;
    ItemOutcome::Completed(record.state)
}

/// Infrastructure failure: requeue while attempts remain, else dead-letter.
async fn reschedule(ctx: &Arc<WorkerContext>, item: &QueuedTask, reason: &str) -> ItemOutcome {
    let attempts = item.task.attempt + 1;
    if attempts >= ctx.settings.max_attempts {
        return poison(ctx, item, attempts, reason).await;
    }

    info!(
        "Job {} will be retried (attempt {}/{}): {}",
        item.task.id, attempts, ctx.settings.max_attempts, reason
    );
    requeue(ctx, item).await
}

/// Hands the item back to the queue after the retry delay.
async fn requeue(ctx: &Arc<WorkerContext>, item: &QueuedTask) -> ItemOutcome {
    tokio::time::sleep(ctx.settings.retry_delay).await;

    if let Err(e) = ctx.queue.retry(item).await {
        // Unacked, so the broker hands it out again.
        error!("Failed to requeue job {}: {}", item.task.id, e);
    }
    ItemOutcome::Retried
}

/// Gives up on a job: clears its outputs, records the failure, notifies,
/// then dead-letters the item. The staged upload is kept so the job can be
/// replayed by hand.
///
/// The item stays in the queue until both the cleanup and the failure
/// record have gone through.
async fn poison(ctx: &Arc<WorkerContext>, item: &QueuedTask, attempts: u32, reason: &str) -> ItemOutcome {
    let detail = format!("gave up after {} attempts: {}", attempts, reason);
    error!("☠️ Job {} {}", item.task.id, detail);

    if let Err(e) = clear_outputs(ctx, &item.task.id).await {
        warn!("Cannot give up on job {} yet, outputs remain: {}", item.task.id, e);
        return requeue(ctx, item).await;
    }

    match ctx
        .jobs
        .mark_failed(&item.task.id, item.task.task_id, &detail)
        .await
    {
        Ok(Some(record)) => {
            metrics::JOBS_FINISHED_TOTAL.with_label_values(&["failed"]).inc();
            deliver_webhook(ctx, &record).await;
        }
        Ok(None) => debug!("Job {} is already finished or superseded", item.task.id),
        Err(e) => {
            warn!("Cannot give up on job {} yet, failure not recorded: {}", item.task.id, e);
            return requeue(ctx, item).await;
        }
    }

    metrics::JOBS_DEAD_LETTERED_TOTAL.inc();
    if let Err(e) = ctx.queue.dead_letter(item, &detail).await {
        error!("Failed to dead-letter job {}: {}", item.task.id, e);
    }
    ItemOutcome::DeadLettered
}

/// Removes anything published under the job's prefix by an earlier attempt.
async fn clear_outputs(ctx: &Arc<WorkerContext>, id: &str) -> Result<(), StorageError> {
    let removed = ctx.storage.delete_prefix(&artifact_prefix(id)).await?;
    if removed > 0 {
        info!("Removed {} stale objects for job {}", removed, id);
    }
    Ok(())
}

async fn deliver_webhook(ctx: &Arc<WorkerContext>, record: &JobRecord) {
    let Some(url) = record.webhook_url.as_deref() else {
        return;
    };
    let Some(payload) = WebhookPayload::for_record(record) else {
        return;
    };

    match ctx.notifier.notify(url, &payload).await {
        Ok(()) => {
            metrics::WEBHOOK_DELIVERIES_TOTAL.with_label_values(&["delivered"]).inc();
            debug!("Webhook sent for job {}", record.id);
        }
        Err(e) => {
            metrics::WEBHOOK_DELIVERIES_TOTAL.with_label_values(&["failed"]).inc();
            warn!("Webhook delivery for job {} to {} failed: {}", record.id, url, e);
        }
    }
}

async fn ack(ctx: &Arc<WorkerContext>, item: &QueuedTask) {
    if let Err(e) = ctx.queue.ack(item).await {
        error!("Failed to ack job {}: {}", item.task.id, e);
    }
}
