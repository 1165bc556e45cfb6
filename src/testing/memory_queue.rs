use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;

use crate::infrastructure::queue::{QueueError, QueueResult, QueuedTask, TaskQueue};
use crate::modules::transcode::events::TranscodeTask;

/// FIFO queue with delivery tags. Items taken by `dequeue` are never handed
/// out again unless a test calls `push_redelivery`.
#[derive(Debug, Default)]
pub struct MemoryTaskQueue {
    pending: Mutex<VecDeque<QueuedTask>>,
    acked: Mutex<Vec<u64>>,
    dead: Mutex<Vec<(TranscodeTask, String)>>,
    next_tag: AtomicU64,
    reject_publish: AtomicBool,
}

impl MemoryTaskQueue {
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn pending_tasks(&self) -> Vec<TranscodeTask> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|item| item.task.clone())
            .collect()
    }

    pub fn acked_count(&self) -> usize {
        self.acked.lock().unwrap().len()
    }

    pub fn dead_letters(&self) -> Vec<(TranscodeTask, String)> {
        self.dead.lock().unwrap().clone()
    }

    /// Simulates the broker handing out an unacked item again.
    pub fn push_redelivery(&self, task: TranscodeTask) {
        self.push(task, true);
    }

    pub fn set_reject_publish(&self, reject: bool) {
        self.reject_publish.store(reject, Ordering::SeqCst);
    }

    fn push(&self, task: TranscodeTask, redelivered: bool) {
        let delivery_tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.lock().unwrap().push_back(QueuedTask {
            task,
            delivery_tag,
            channel_generation: 0,
            redelivered,
        });
    }

    fn check_publish(&self) -> QueueResult<()> {
        if self.reject_publish.load(Ordering::SeqCst) {
            return Err(QueueError::Publish("broker rejected message".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, task: &TranscodeTask) -> QueueResult<()> {
        self.check_publish()?;
        self.push(task.clone(), false);
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Option<QueuedTask>> {
        Ok(self.pending.lock().unwrap().pop_front())
    }

    async fn ack(&self, item: &QueuedTask) -> QueueResult<()> {
        self.acked.lock().unwrap().push(item.delivery_tag);
        Ok(())
    }

    async fn retry(&self, item: &QueuedTask) -> QueueResult<()> {
        self.check_publish()?;
        self.push(item.task.next_attempt(), false);
        self.ack(item).await
    }

    async fn dead_letter(&self, item: &QueuedTask, reason: &str) -> QueueResult<()> {
        self.dead
            .lock()
            .unwrap()
            .push((item.task.clone(), reason.to_string()));
        self.ack(item).await
    }
}
