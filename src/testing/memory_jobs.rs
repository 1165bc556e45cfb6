use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::modules::transcode::model::{JobRecord, JobState, NewJob, progress};
use crate::modules::transcode::repository::{JobStore, JobStoreError, JobStoreResult};

/// Job store backed by a map, applying the same conditional transitions as
/// the Postgres store.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: Mutex<HashMap<String, JobRecord>>,
    unavailable: AtomicBool,
    begin_unavailable: AtomicBool,
}

impl MemoryJobStore {
    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes only `begin_attempt` fail, leaving every other call working.
    pub fn set_begin_unavailable(&self, unavailable: bool) {
        self.begin_unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> JobStoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(JobStoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    /// Applies `update` when the record exists, belongs to `task_id` (if
    /// given) and may move to `next`.
    fn transition(
        &self,
        id: &str,
        task_id: Option<Uuid>,
        next: JobState,
        update: impl FnOnce(&mut JobRecord),
    ) -> JobStoreResult<Option<JobRecord>> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(id) else {
            return Ok(None);
        };
        if task_id.is_some_and(|t| t != record.task_id) || !record.state.can_transition_to(next) {
            return Ok(None);
        }

        let now = OffsetDateTime::now_utc();
        record.state = next;
        record.updated_at = now;
        if next.is_terminal() {
            record.completed_at = Some(now);
        }
        update(record);
        Ok(Some(record.clone()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> JobStoreResult<JobRecord> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&job.id) {
            return Err(JobStoreError::Duplicate(job.id));
        }

        let record = job.into_record();
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: &str) -> JobStoreResult<Option<JobRecord>> {
        self.check()?;
        Ok(self.get(id))
    }

    async fn find_by_task_id(&self, task_id: Uuid) -> JobStoreResult<Option<JobRecord>> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.task_id == task_id)
            .cloned())
    }

    async fn begin_attempt(&self, id: &str, task_id: Uuid) -> JobStoreResult<Option<JobRecord>> {
        if self.begin_unavailable.load(Ordering::SeqCst) {
            return Err(JobStoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.transition(id, Some(task_id), JobState::Running, |r| {
            r.attempts += 1;
            r.progress_note = progress::DOWNLOADING.to_string();
        })
    }

    async fn set_progress(&self, id: &str, note: &str) -> JobStoreResult<()> {
        self.check()?;
        if let Some(record) = self.records.lock().unwrap().get_mut(id) {
            if record.state == JobState::Running {
                record.progress_note = note.to_string();
                record.updated_at = OffsetDateTime::now_utc();
            }
        }
        Ok(())
    }

    async fn mark_succeeded(&self, id: &str, result_prefix: &str) -> JobStoreResult<Option<JobRecord>> {
        self.transition(id, None, JobState::Succeeded, |r| {
            r.result_prefix = Some(result_prefix.to_string());
            r.progress_note = progress::COMPLETED.to_string();
        })
    }

    async fn mark_failed(
        &self,
        id: &str,
        task_id: Uuid,
        error_detail: &str,
    ) -> JobStoreResult<Option<JobRecord>> {
        self.transition(id, Some(task_id), JobState::Failed, |r| {
            r.error_detail = Some(error_detail.to_string());
            r.progress_note = progress::FAILED.to_string();
        })
    }

    async fn remove_unqueued(&self, id: &str) -> JobStoreResult<bool> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        if records.get(id).is_some_and(|r| r.state == JobState::Queued) {
            records.remove(id);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_are_conditional() {
        let store = MemoryJobStore::default();
        let record = store.create(NewJob::new("a", None)).await.unwrap();

        assert!(store.mark_succeeded("a", "a/").await.unwrap().is_none());
        assert!(store.begin_attempt("a", record.task_id).await.unwrap().is_some());
        assert!(store.mark_failed("a", Uuid::new_v4(), "stale").await.unwrap().is_none());
        assert!(store.mark_failed("a", record.task_id, "boom").await.unwrap().is_some());
        assert!(store.begin_attempt("a", record.task_id).await.unwrap().is_none());
        assert!(!store.remove_unqueued("a").await.unwrap());

        let failed = store.get("a").unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.error_detail.as_deref(), Some("boom"));
        assert!(failed.result_prefix.is_none());
    }

    #[tokio::test]
    async fn queued_job_can_be_failed_directly() {
        let store = MemoryJobStore::default();
        let record = store.create(NewJob::new("q", None)).await.unwrap();

        let failed = store.mark_failed("q", record.task_id, "gave up").await.unwrap().unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.attempts, 0);
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = MemoryJobStore::default();
        store.create(NewJob::new("dup1", None)).await.unwrap();
        let err = store.create(NewJob::new("dup1", None)).await.unwrap_err();
        assert!(matches!(err, JobStoreError::Duplicate(id) if id == "dup1"));
    }
}
