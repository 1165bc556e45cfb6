//! In-memory implementations of the infrastructure seams, used by unit and
//! end-to-end tests so the whole pipeline runs without Postgres, RabbitMQ,
//! S3 or ffmpeg.

mod memory_jobs;
mod memory_queue;
mod memory_storage;
mod mock_converter;
mod mock_notifier;

use std::sync::Arc;

pub use memory_jobs::MemoryJobStore;
pub use memory_queue::MemoryTaskQueue;
pub use memory_storage::MemoryObjectStore;
pub use mock_converter::{Script, ScriptedConverter};
pub use mock_notifier::RecordingNotifier;

use crate::config::settings::AppConfig;
use crate::state::AppState;

pub fn test_config() -> AppConfig {
    AppConfig {
        server_port: 0,
        database_url: "postgres://unused".to_string(),
        rabbitmq_url: "amqp://unused".to_string(),
        minio_url: "http://unused:9000".to_string(),
        minio_bucket: "videos".to_string(),
        minio_access_key: "minio".to_string(),
        minio_secret_key: "minio123".to_string(),
        s3_region: "us-east-1".to_string(),
        video_codec: "copy".to_string(),
        audio_codec: "copy".to_string(),
        segment_seconds: 10,
        transcode_timeout_secs: 0,
        ffmpeg_path: "ffmpeg".to_string(),
        scratch_dir: None,
        worker_count: 1,
        queue_name: "transcoding_tasks".to_string(),
        queue_max_attempts: 3,
        queue_poll_interval_ms: 10,
        queue_retry_delay_ms: 0,
        max_upload_bytes: 1024 * 1024,
        webhook_timeout_secs: 1,
        webhook_secret: None,
    }
}

/// An `AppState` wired to fresh in-memory backends, with typed handles kept
/// for assertions.
pub struct TestState {
    pub state: AppState,
    pub jobs: Arc<MemoryJobStore>,
    pub storage: Arc<MemoryObjectStore>,
    pub queue: Arc<MemoryTaskQueue>,
}

impl TestState {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let jobs = Arc::new(MemoryJobStore::default());
        let storage = Arc::new(MemoryObjectStore::default());
        let queue = Arc::new(MemoryTaskQueue::default());

        let state = AppState::new(config, jobs.clone(), storage.clone(), queue.clone());
        Self {
            state,
            jobs,
            storage,
            queue,
        }
    }
}
