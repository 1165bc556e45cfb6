use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::infrastructure::webhook::{Notifier, WebhookError};
use crate::modules::transcode::events::WebhookPayload;

/// Records every notification; optionally answers each one with a 500.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(String, WebhookPayload)>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<(String, WebhookPayload)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));

        if self.failing.load(Ordering::SeqCst) {
            return Err(WebhookError::Rejected { status: 500 });
        }
        Ok(())
    }
}
