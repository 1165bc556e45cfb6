use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection,
    ConnectionProperties,
};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::{QueueError, QueueResult, QueuedTask, TaskQueue};
use crate::modules::transcode::events::{DeadLetter, TranscodeTask};

/// The live channel plus a counter bumped on every reconnect.
struct ChannelSlot<C> {
    channel: C,
    generation: u64,
}

impl<C> ChannelSlot<C> {
    fn new(channel: C) -> Self {
        Self {
            channel,
            generation: 0,
        }
    }

    fn replace(&mut self, channel: C) {
        self.channel = channel;
        self.generation += 1;
    }

    /// Whether a delivery handed out under `generation` can still be acked here.
    fn issued(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

#[derive(Clone)]
pub struct RabbitMqService {
    url: String,
    queue: String,
    dead_letter_queue: String,
    conn: Arc<Mutex<Connection>>,
    channel: Arc<Mutex<ChannelSlot<Channel>>>,
}

impl RabbitMqService {
    async fn connect(url: &str, queues: [&str; 2]) -> QueueResult<(Connection, Channel)> {
        info!("Connecting to RabbitMQ at {}", url);
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to RabbitMQ: {}", e)))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to create channel: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to enable publisher confirms: {}", e)))?;

        for queue in queues {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| QueueError::Connection(format!("Failed to declare queue {}: {}", queue, e)))?;
        }

        info!("Connected to RabbitMQ");
        Ok((conn, channel))
    }

    pub async fn new(url: &str, queue: &str) -> QueueResult<Self> {
        let dead_letter_queue = format!("{}.dead", queue);
        let (conn, channel) = Self::connect(url, [queue, &dead_letter_queue]).await?;

        Ok(Self {
            url: url.to_string(),
            queue: queue.to_string(),
            dead_letter_queue,
            conn: Arc::new(Mutex::new(conn)),
            channel: Arc::new(Mutex::new(ChannelSlot::new(channel))),
        })
    }

    async fn reconnect(&self) -> QueueResult<()> {
        warn!("RabbitMQ connection dropped, reconnecting...");
        let (conn, channel) = Self::connect(&self.url, [&self.queue, &self.dead_letter_queue]).await?;
        *self.conn.lock().await = conn;
        self.channel.lock().await.replace(channel);
        Ok(())
    }

    async fn publish_internal(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        let slot = self.channel.lock().await;

        let confirmation = slot
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| QueueError::Publish(format!("Failed to publish message: {}", e)))?
            .await
            .map_err(|e| QueueError::Publish(format!("Failed to confirm publication: {}", e)))?;

        if confirmation.is_nack() {
            return Err(QueueError::Publish(format!("Broker rejected message for {}", queue)));
        }

        Ok(())
    }

    pub async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        if let Err(e) = self.publish_internal(queue, payload).await {
            warn!("RabbitMQ publish failed: {}. Retrying after reconnect.", e);
            self.reconnect().await?;
            self.publish_internal(queue, payload).await?;
        }

        Ok(())
    }

    async fn ack_tag(&self, delivery_tag: u64, generation: u64) -> QueueResult<()> {
        let slot = self.channel.lock().await;
        if !slot.issued(generation) {
            // The old channel is gone and the broker has already requeued it.
            warn!("Skipping ack of delivery {} from a closed channel", delivery_tag);
            return Ok(());
        }

        slot.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Ack(format!("Failed to ack delivery {}: {}", delivery_tag, e)))
    }
}

#[async_trait]
impl TaskQueue for RabbitMqService {
    async fn enqueue(&self, task: &TranscodeTask) -> QueueResult<()> {
        let payload = serde_json::to_vec(task)?;
        self.publish(&self.queue, &payload).await
    }

    async fn dequeue(&self) -> QueueResult<Option<QueuedTask>> {
        loop {
            let (message, generation) = {
                let slot = self.channel.lock().await;
                let message = slot
                    .channel
                    .basic_get(&self.queue, BasicGetOptions { no_ack: false })
                    .await;
                (message, slot.generation)
            };

            let message = match message {
                Ok(Some(m)) => m,
                Ok(None) => return Ok(None),
                Err(e) => {
                    self.reconnect().await?;
                    return Err(QueueError::Dequeue(e.to_string()));
                }
            };

            let delivery = message.delivery;
            match serde_json::from_slice::<TranscodeTask>(&delivery.data) {
                Ok(task) => {
                    return Ok(Some(QueuedTask {
                        task,
                        delivery_tag: delivery.delivery_tag,
                        channel_generation: generation,
                        redelivered: delivery.redelivered,
                    }));
                }
                Err(e) => {
                    // Unparseable payloads go straight to the dead-letter queue.
                    error!("❌ Failed to parse queued task: {}", e);
                    self.publish(&self.dead_letter_queue, &delivery.data).await?;
                    self.ack_tag(delivery.delivery_tag, generation).await?;
                }
            }
        }
    }

    async fn ack(&self, item: &QueuedTask) -> QueueResult<()> {
        self.ack_tag(item.delivery_tag, item.channel_generation).await
    }

    async fn retry(&self, item: &QueuedTask) -> QueueResult<()> {
        let payload = serde_json::to_vec(&item.task.next_attempt())?;
        self.publish(&self.queue, &payload).await?;
        self.ack_tag(item.delivery_tag, item.channel_generation).await
    }

    async fn dead_letter(&self, item: &QueuedTask, reason: &str) -> QueueResult<()> {
        let letter = DeadLetter {
            task: item.task.clone(),
            reason: reason.to_string(),
            failed_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        };
        let payload = serde_json::to_vec(&letter)?;
        self.publish(&self.dead_letter_queue, &payload).await?;
        self.ack_tag(item.delivery_tag, item.channel_generation).await
    }
}
