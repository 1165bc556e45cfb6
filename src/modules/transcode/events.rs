use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{JobRecord, JobState};

/// Queue message. Carries only what a worker needs to locate the job; the
/// job store stays authoritative for state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeTask {
    pub task_id: Uuid,
    pub id: String,
    pub source_key: String,
    /// Zero-based count of explicit requeues after infrastructure failures.
    #[serde(default)]
    pub attempt: u32,
}

impl TranscodeTask {
    pub fn new(task_id: Uuid, id: impl Into<String>, source_key: impl Into<String>) -> Self {
        Self {
            task_id,
            id: id.into(),
            source_key: source_key.into(),
            attempt: 0,
        }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Body published to the dead-letter queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub task: TranscodeTask,
    pub reason: String,
    pub failed_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub task_id: Uuid,
    pub status: WebhookStatus,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WebhookPayload {
    /// Builds the notification for a terminal record; `None` otherwise.
    pub fn for_record(record: &JobRecord) -> Option<Self> {
        let (status, error, message) = match record.state {
            JobState::Succeeded => (
                WebhookStatus::Completed,
                None,
                Some("Video processed successfully".to_string()),
            ),
            JobState::Failed => (WebhookStatus::Failed, record.error_detail.clone(), None),
            JobState::Queued | JobState::Running => return None,
        };

        Some(Self {
            task_id: record.task_id,
            status,
            id: record.id.clone(),
            error,
            message,
        })
    }
}
