use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use sha2::Sha256;
use tracing::debug;
use url::Url;

use super::{Notifier, WebhookError};
use crate::modules::transcode::events::WebhookPayload;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    secret: Option<String>,
}

impl WebhookClient {
    pub fn new(timeout: Duration, secret: Option<String>) -> Result<Self, WebhookError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("videostream/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http, secret })
    }

    /// `sha256=<hex>` HMAC of the exact request body.
    pub fn sign(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| WebhookError::Signing(e.to_string()))?;
        mac.update(body);
        Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
    }
}

/// Webhook targets must be absolute http(s) URLs.
pub fn parse_webhook_url(raw: &str) -> Result<Url, WebhookError> {
    let url = Url::parse(raw).map_err(|e| WebhookError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        scheme => Err(WebhookError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", scheme),
        }),
    }
}

#[async_trait]
impl Notifier for WebhookClient {
    async fn notify(&self, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let target = parse_webhook_url(url)?;
        let body = serde_json::to_vec(payload)?;

        let mut request = self
            .http
            .post(target)
            .header(CONTENT_TYPE, "application/json");

        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, Self::sign(secret, &body)?);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Rejected {
                status: status.as_u16(),
            });
        }

        debug!("Webhook for {} delivered to {} ({})", payload.id, url, status);
        Ok(())
    }
}
