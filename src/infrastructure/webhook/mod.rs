use async_trait::async_trait;
use thiserror::Error;

use crate::modules::transcode::events::WebhookPayload;

pub mod client;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook endpoint answered {status}")]
    Rejected { status: u16 },

    #[error("invalid signing key: {0}")]
    Signing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Single-attempt delivery of terminal-state notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError>;
}
