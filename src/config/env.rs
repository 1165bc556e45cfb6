use std::env;
use std::fmt;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    RabbitMqUrl,
    MinioUrl,
    MinioBucket,
    MinioAccessKey,
    MinioSecretKey,
    S3Region,
    VideoCodec,
    AudioCodec,
    SegmentSeconds,
    TranscodeTimeoutSecs,
    FfmpegPath,
    ScratchDir,
    WorkerCount,
    QueueName,
    QueueMaxAttempts,
    QueuePollIntervalMs,
    QueueRetryDelayMs,
    MaxUploadBytes,
    WebhookTimeoutSecs,
    WebhookSecret,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::RabbitMqUrl => "RABBITMQ_URL",
            EnvKey::MinioUrl => "MINIO_ENDPOINT",
            EnvKey::MinioBucket => "MINIO_BUCKET_VIDEOS",
            EnvKey::MinioAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::MinioSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::S3Region => "S3_REGION",
            EnvKey::VideoCodec => "TRANSCODE_VIDEO_CODEC",
            EnvKey::AudioCodec => "TRANSCODE_AUDIO_CODEC",
            EnvKey::SegmentSeconds => "TRANSCODE_SEGMENT_SECONDS",
            EnvKey::TranscodeTimeoutSecs => "TRANSCODE_TIMEOUT_SECS",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::ScratchDir => "SCRATCH_DIR",
            EnvKey::WorkerCount => "WORKER_COUNT",
            EnvKey::QueueName => "QUEUE_NAME",
            EnvKey::QueueMaxAttempts => "QUEUE_MAX_ATTEMPTS",
            EnvKey::QueuePollIntervalMs => "QUEUE_POLL_INTERVAL_MS",
            EnvKey::QueueRetryDelayMs => "QUEUE_RETRY_DELAY_MS",
            EnvKey::MaxUploadBytes => "MAX_UPLOAD_BYTES",
            EnvKey::WebhookTimeoutSecs => "WEBHOOK_TIMEOUT_SECS",
            EnvKey::WebhookSecret => "WEBHOOK_SECRET",
        }
    }
}

/// Missing required variables surface as `ConfigError::Missing` with the key name.
pub fn get(key: EnvKey) -> Result<String, ConfigError> {
    env::var(key.as_str()).map_err(|_| ConfigError::Missing(key.as_str()))
}

pub fn get_opt(key: EnvKey) -> Option<String> {
    env::var(key.as_str()).ok().filter(|v| !v.trim().is_empty())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

/// Unset or blank variables fall back to `default`; anything else must parse.
pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    let raw = env::var(key.as_str()).ok();
    parse_or(key, raw, default)
}

fn parse_or<T: FromStr>(key: EnvKey, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(val) => val.parse::<T>().map_err(|e| ConfigError::Invalid {
            key: key.as_str(),
            reason: format!("'{}': {}", val, e),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
