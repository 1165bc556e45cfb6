use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use super::model::{JobRecord, JobState, MAX_ID_LEN, is_valid_job_id, playlist_name};
use crate::infrastructure::webhook::client::parse_webhook_url;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    /// Absolute http(s) URL notified once the job finishes.
    pub webhook_url: Option<String>,
}

/// Path and query of an upload, validated together.
#[derive(Debug, Validate)]
pub struct UploadRequest {
    #[validate(custom(function = "validate_job_id"))]
    pub id: String,
    #[validate(custom(function = "validate_webhook_url"))]
    pub webhook_url: Option<String>,
}

fn validate_job_id(id: &str) -> Result<(), ValidationError> {
    if is_valid_job_id(id) {
        return Ok(());
    }
    let mut err = ValidationError::new("job_id");
    err.message = Some(
        format!(
            "id must be 1-{} characters of letters, digits, '-' or '_'",
            MAX_ID_LEN
        )
        .into(),
    );
    Err(err)
}

fn validate_webhook_url(url: &str) -> Result<(), ValidationError> {
    parse_webhook_url(url).map(|_| ()).map_err(|e| {
        let mut err = ValidationError::new("webhook_url");
        err.message = Some(e.to_string().into());
        err
    })
}

/// Flattens validator output into one human-readable line.
pub fn validation_message(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("invalid {}", field),
            })
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitResponse {
    pub task_id: Uuid,
    /// Always `processing`.
    pub status: String,
    pub id: String,
}

impl SubmitResponse {
    pub fn accepted(record: &JobRecord) -> Self {
        Self {
            task_id: record.task_id,
            status: "processing".to_string(),
            id: record.id.clone(),
        }
    }
}

/// Status vocabulary exposed to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Progress,
    Success,
    Failure,
}

impl From<JobState> for TaskStatus {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Queued => TaskStatus::Pending,
            JobState::Running => TaskStatus::Progress,
            JobState::Succeeded => TaskStatus::Success,
            JobState::Failed => TaskStatus::Failure,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskMeta {
    pub progress: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskStatusResponse {
    pub task_id: Uuid,
    pub id: String,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub meta: Option<TaskMeta>,
}

impl From<JobRecord> for TaskStatusResponse {
    fn from(record: JobRecord) -> Self {
        let status = TaskStatus::from(record.state);

        let (result, meta) = match record.state {
            JobState::Queued => (
                None,
                Some(TaskMeta {
                    progress: record.progress_note,
                    attempts: None,
                }),
            ),
            JobState::Running => (
                None,
                Some(TaskMeta {
                    progress: record.progress_note,
                    attempts: Some(record.attempts),
                }),
            ),
            JobState::Succeeded => (
                Some(TaskResult {
                    playlist: record
                        .result_prefix
                        .as_ref()
                        .map(|prefix| format!("{}{}", prefix, playlist_name(&record.id))),
                    prefix: record.result_prefix,
                    error: None,
                    completed_at: record.completed_at,
                }),
                None,
            ),
            JobState::Failed => (
                Some(TaskResult {
                    prefix: None,
                    playlist: None,
                    error: record.error_detail,
                    completed_at: record.completed_at,
                }),
                None,
            ),
        };

        Self {
            task_id: record.task_id,
            id: record.id,
            status,
            result,
            meta,
        }
    }
}
