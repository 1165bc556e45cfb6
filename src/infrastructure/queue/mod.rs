use async_trait::async_trait;
use thiserror::Error;

use crate::modules::transcode::events::TranscodeTask;

pub mod rabbitmq;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("dequeue failed: {0}")]
    Dequeue(String),

    #[error("ack failed: {0}")]
    Ack(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// An item taken off the queue but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task: TranscodeTask,
    pub delivery_tag: u64,
    /// Which broker channel handed the item out. Delivery tags are only
    /// meaningful on that channel.
    pub channel_generation: u64,
    /// Set by the broker when the item was handed out before and never acked.
    pub redelivered: bool,
}

/// Durable at-least-once work queue shared by every worker.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Returns once the broker has confirmed the message.
    async fn enqueue(&self, task: &TranscodeTask) -> QueueResult<()>;

    /// Non-blocking fetch of the next item, if any.
    async fn dequeue(&self) -> QueueResult<Option<QueuedTask>>;

    async fn ack(&self, item: &QueuedTask) -> QueueResult<()>;

    /// Puts a copy back with the attempt counter bumped and acks the original.
    async fn retry(&self, item: &QueuedTask) -> QueueResult<()>;

    /// Moves the item to the dead-letter queue and acks the original.
    async fn dead_letter(&self, item: &QueuedTask, reason: &str) -> QueueResult<()>;
}
