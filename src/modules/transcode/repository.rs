use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::model::{JobRecord, JobRow, NewJob, progress};
use crate::infrastructure::db::pool::DbPool;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job '{0}' already exists")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt job row: {0}")]
    Corrupt(String),
}

pub type JobStoreResult<T> = Result<T, JobStoreError>;

/// Durable mapping from job id to its record.
///
/// Every mutating call is a single conditional transition. Calls that
/// return `Option<JobRecord>` yield `None` when the record is missing or
/// not in a state the transition may start from; nothing is changed then.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> JobStoreResult<JobRecord>;

    async fn find_by_id(&self, id: &str) -> JobStoreResult<Option<JobRecord>>;

    async fn find_by_task_id(&self, task_id: Uuid) -> JobStoreResult<Option<JobRecord>>;

    /// QUEUED|RUNNING -> RUNNING, incrementing `attempts`. Only the record
    /// admitted under `task_id` is affected.
    async fn begin_attempt(&self, id: &str, task_id: Uuid) -> JobStoreResult<Option<JobRecord>>;

    /// Updates the advisory note of a RUNNING job.
    async fn set_progress(&self, id: &str, note: &str) -> JobStoreResult<()>;

    /// RUNNING -> SUCCEEDED.
    async fn mark_succeeded(&self, id: &str, result_prefix: &str) -> JobStoreResult<Option<JobRecord>>;

    /// QUEUED|RUNNING -> FAILED for the record admitted under `task_id`. A
    /// job whose attempts never got past the job store can still be failed.
    async fn mark_failed(
        &self,
        id: &str,
        task_id: Uuid,
        error_detail: &str,
    ) -> JobStoreResult<Option<JobRecord>>;

    /// Removes a job that was never handed to the queue. Only QUEUED jobs
    /// can be removed; returns whether a row was deleted.
    async fn remove_unqueued(&self, id: &str) -> JobStoreResult<bool>;
}

const COLUMNS: &str = "id, task_id, source_key, state, progress_note, result_prefix, error_detail, \
     webhook_url, attempts, created_at, updated_at, completed_at";

pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn into_record(row: Option<JobRow>) -> JobStoreResult<Option<JobRecord>> {
        row.map(JobRecord::try_from)
            .transpose()
            .map_err(JobStoreError::Corrupt)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> JobStoreResult<JobRecord> {
        let sql = format!(
            r#"
            INSERT INTO transcode_jobs (id, task_id, source_key, state, progress_note, webhook_url)
            VALUES ($1, $2, $3, 'QUEUED', $4, $5)
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(&job.id)
            .bind(job.task_id)
            .bind(&job.source_key)
            .bind(progress::QUEUED)
            .bind(&job.webhook_url)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    JobStoreError::Duplicate(job.id.clone())
                }
                other => JobStoreError::Database(other),
            })?;

        JobRecord::try_from(row).map_err(JobStoreError::Corrupt)
    }

    async fn find_by_id(&self, id: &str) -> JobStoreResult<Option<JobRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM transcode_jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Self::into_record(row)
    }

    async fn find_by_task_id(&self, task_id: Uuid) -> JobStoreResult<Option<JobRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM transcode_jobs WHERE task_id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        Self::into_record(row)
    }

    async fn begin_attempt(&self, id: &str, task_id: Uuid) -> JobStoreResult<Option<JobRecord>> {
        let sql = format!(
            r#"
            UPDATE transcode_jobs
            SET state = 'RUNNING', attempts = attempts + 1, progress_note = $2, updated_at = NOW()
            WHERE id = $1 AND task_id = $3 AND state IN ('QUEUED', 'RUNNING')
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .bind(progress::DOWNLOADING)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        Self::into_record(row)
    }

    async fn set_progress(&self, id: &str, note: &str) -> JobStoreResult<()> {
        sqlx::query(
            r#"
            UPDATE transcode_jobs
            SET progress_note = $2, updated_at = NOW()
            WHERE id = $1 AND state = 'RUNNING'
            "#,
        )
        .bind(id)
        .bind(note)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_succeeded(&self, id: &str, result_prefix: &str) -> JobStoreResult<Option<JobRecord>> {
        let sql = format!(
            r#"
            UPDATE transcode_jobs
            SET state = 'SUCCEEDED', result_prefix = $2, progress_note = $3,
                completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND state = 'RUNNING'
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .bind(result_prefix)
            .bind(progress::COMPLETED)
            .fetch_optional(&self.pool)
            .await?;

        Self::into_record(row)
    }

    async fn mark_failed(
        &self,
        id: &str,
        task_id: Uuid,
        error_detail: &str,
    ) -> JobStoreResult<Option<JobRecord>> {
        let sql = format!(
            r#"
            UPDATE transcode_jobs
            SET state = 'FAILED', error_detail = $2, progress_note = $3,
                completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND task_id = $4 AND state IN ('QUEUED', 'RUNNING')
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .bind(error_detail)
            .bind(progress::FAILED)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        Self::into_record(row)
    }

    async fn remove_unqueued(&self, id: &str) -> JobStoreResult<bool> {
        let result = sqlx::query("DELETE FROM transcode_jobs WHERE id = $1 AND state = 'QUEUED'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
