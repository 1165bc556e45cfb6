use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

pub const MAX_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Queued -> Running -> {Succeeded | Failed}. Running may be re-entered
    /// when the queue redelivers an item after a worker crash.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Running, JobState::Running)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
                | (JobState::Queued, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(JobState::Queued),
            "RUNNING" => Ok(JobState::Running),
            "SUCCEEDED" => Ok(JobState::Succeeded),
            "FAILED" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// Advisory phase names written to `progress_note`.
pub mod progress {
    pub const QUEUED: &str = "queued";
    pub const DOWNLOADING: &str = "downloading";
    pub const CONVERTING: &str = "converting";
    pub const PUBLISHING: &str = "publishing";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub task_id: Uuid,
    pub source_key: String,
    pub state: JobState,
    pub progress_note: String,
    pub result_prefix: Option<String>,
    pub error_detail: Option<String>,
    pub webhook_url: Option<String>,
    pub attempts: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

/// Row shape as stored; `state` is kept as text in the table.
#[derive(Debug, FromRow)]
pub struct JobRow {
    pub id: String,
    pub task_id: Uuid,
    pub source_key: String,
    pub state: String,
    pub progress_note: String,
    pub result_prefix: Option<String>,
    pub error_detail: Option<String>,
    pub webhook_url: Option<String>,
    pub attempts: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = String;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            state: row.state.parse()?,
            id: row.id,
            task_id: row.task_id,
            source_key: row.source_key,
            progress_note: row.progress_note,
            result_prefix: row.result_prefix,
            error_detail: row.error_detail,
            webhook_url: row.webhook_url,
            attempts: row.attempts,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

/// Admission-time data for a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub task_id: Uuid,
    pub source_key: String,
    pub webhook_url: Option<String>,
}

impl NewJob {
    pub fn new(id: impl Into<String>, webhook_url: Option<String>) -> Self {
        let id = id.into();
        Self {
            task_id: Uuid::new_v4(),
            source_key: source_key_for(&id),
            id,
            webhook_url,
        }
    }

    pub fn into_record(self) -> JobRecord {
        let now = OffsetDateTime::now_utc();
        JobRecord {
            id: self.id,
            task_id: self.task_id,
            source_key: self.source_key,
            state: JobState::Queued,
            progress_note: progress::QUEUED.to_string(),
            result_prefix: None,
            error_detail: None,
            webhook_url: self.webhook_url,
            attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

pub fn source_key_for(id: &str) -> String {
    format!("uploads/{}", id)
}

pub fn artifact_prefix(id: &str) -> String {
    format!("{}/", id)
}

pub fn playlist_name(id: &str) -> String {
    format!("{}-playlist.m3u8", id)
}

/// Job ids double as storage prefixes, so they are restricted to a safe
/// path segment alphabet.
pub fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Playlist,
    Segment,
    Other,
}

impl MediaKind {
    pub fn from_filename(filename: &str) -> Self {
        if filename.ends_with(".m3u8") {
            MediaKind::Playlist
        } else if filename.ends_with(".ts") {
            MediaKind::Segment
        } else {
            MediaKind::Other
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            MediaKind::Playlist => "application/vnd.apple.mpegurl",
            MediaKind::Segment => "video/mp2t",
            MediaKind::Other => "application/octet-stream",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Playlist => "playlist",
            MediaKind::Segment => "segment",
            MediaKind::Other => "other",
        }
    }
}
