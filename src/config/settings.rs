use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::config::env::{self, ConfigError, EnvKey};
use crate::workers::ffmpeg::TranscodeSettings;
use crate::workers::transcoder::WorkerSettings;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: String,
    pub rabbitmq_url: String,
    pub minio_url: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub s3_region: String,

    pub video_codec: String,
    pub audio_codec: String,
    pub segment_seconds: u32,
    pub transcode_timeout_secs: u64,
    pub ffmpeg_path: String,
    pub scratch_dir: Option<PathBuf>,

    pub worker_count: usize,
    pub queue_name: String,
    pub queue_max_attempts: u32,
    pub queue_poll_interval_ms: u64,
    pub queue_retry_delay_ms: u64,

    pub max_upload_bytes: usize,
    pub webhook_timeout_secs: u64,
    pub webhook_secret: Option<String>,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 8002)?,
            database_url: env::get(EnvKey::DatabaseUrl)?,
            rabbitmq_url: env::get(EnvKey::RabbitMqUrl)?,
            minio_url: env::get(EnvKey::MinioUrl)?,
            minio_bucket: env::get(EnvKey::MinioBucket)?,
            minio_access_key: env::get(EnvKey::MinioAccessKey)?,
            minio_secret_key: env::get(EnvKey::MinioSecretKey)?,
            s3_region: env::get_or(EnvKey::S3Region, "us-east-1"),

            video_codec: env::get_or(EnvKey::VideoCodec, "copy"),
            audio_codec: env::get_or(EnvKey::AudioCodec, "copy"),
            segment_seconds: env::get_parsed(EnvKey::SegmentSeconds, 10)?,
            transcode_timeout_secs: env::get_parsed(EnvKey::TranscodeTimeoutSecs, 0)?,
            ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
            scratch_dir: env::get_opt(EnvKey::ScratchDir).map(PathBuf::from),

            worker_count: env::get_parsed(EnvKey::WorkerCount, 2)?,
            queue_name: env::get_or(EnvKey::QueueName, "transcoding_tasks"),
            queue_max_attempts: env::get_parsed(EnvKey::QueueMaxAttempts, 3)?,
            queue_poll_interval_ms: env::get_parsed(EnvKey::QueuePollIntervalMs, 1000)?,
            queue_retry_delay_ms: env::get_parsed(EnvKey::QueueRetryDelayMs, 5000)?,

            max_upload_bytes: env::get_parsed(EnvKey::MaxUploadBytes, 2 * 1024 * 1024 * 1024)?,
            webhook_timeout_secs: env::get_parsed(EnvKey::WebhookTimeoutSecs, 10)?,
            webhook_secret: env::get_opt(EnvKey::WebhookSecret),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: EnvKey::SegmentSeconds.as_str(),
                reason: "segment duration must be at least 1 second".to_string(),
            });
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid {
                key: EnvKey::WorkerCount.as_str(),
                reason: "at least one worker is required".to_string(),
            });
        }
        if self.queue_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: EnvKey::QueueMaxAttempts.as_str(),
                reason: "must allow at least one attempt".to_string(),
            });
        }
        if self.video_codec.trim().is_empty() || self.audio_codec.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: EnvKey::VideoCodec.as_str(),
                reason: "codec names must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn transcode_settings(&self) -> TranscodeSettings {
        TranscodeSettings {
            video_codec: self.video_codec.clone(),
            audio_codec: self.audio_codec.clone(),
            segment_duration_seconds: self.segment_seconds,
        }
    }

    /// `None` when no wall-clock limit is configured.
    pub fn transcode_timeout(&self) -> Option<Duration> {
        (self.transcode_timeout_secs > 0).then(|| Duration::from_secs(self.transcode_timeout_secs))
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            worker_count: self.worker_count,
            max_attempts: self.queue_max_attempts,
            poll_interval: Duration::from_millis(self.queue_poll_interval_ms),
            retry_delay: Duration::from_millis(self.queue_retry_delay_ms),
            scratch_dir: self.scratch_dir.clone(),
        }
    }
}
