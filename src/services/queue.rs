use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;

/// Stream entry field holding the serialized job.
const PAYLOAD_FIELD: &str = "job";

/// A message handed to a consumer. It stays pending in the group until it is
/// acknowledged, and is redelivered if that never happens.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: String,
    pub payload: String,
}

/// Durable, acknowledgment-based message queue.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Persist a payload on the queue, returning its message id.
    async fn publish(&self, payload: &str) -> Result<String, QueueError>;

    /// Read up to `max` new messages for `consumer`, waiting at most `block`.
    async fn receive(
        &self,
        consumer: &str,
        max: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, QueueError>;

    /// Take over messages another consumer received but never acknowledged.
    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        max: usize,
    ) -> Result<Vec<Delivery>, QueueError>;

    /// Reset the idle time of messages this consumer is still handling so
    /// that no other consumer claims them.
    async fn touch(&self, consumer: &str, message_ids: &[String]) -> Result<(), QueueError>;

    /// Remove a handled message from the queue.
    async fn ack(&self, message_id: &str) -> Result<(), QueueError>;

    /// Reject a message. Without `requeue` the message is dropped for good.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;
}

/// Redis Streams job queue with a consumer group.
pub struct JobQueue {
    client: redis::Client,
    stream: String,
    group: String,
}

impl JobQueue {
    pub fn new(redis_url: &str, stream: &str, group: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            stream: stream.to_string(),
            group: group.to_string(),
        })
    }

    /// Declare the stream and consumer group if they do not exist yet.
    pub async fn init(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                tracing::info!(stream = %self.stream, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                tracing::debug!(stream = %self.stream, group = %self.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(QueueError::Redis(e)),
        }
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Number of entries currently held by the stream.
    pub async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.xlen(&self.stream).await?;
        Ok(depth)
    }

    async fn remove(&self, message_id: &str) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: u64 = conn.xack(&self.stream, &self.group, &[message_id]).await?;
        let _: u64 = conn.xdel(&self.stream, &[message_id]).await?;
        Ok(())
    }
}

fn to_delivery(entry: StreamId) -> Delivery {
    // Entries without a payload are surfaced empty so the consumer rejects them.
    let payload = entry.get::<String>(PAYLOAD_FIELD).unwrap_or_default();
    Delivery {
        message_id: entry.id,
        payload,
    }
}

/// XAUTOCLAIM replies `[next-cursor, entries, deleted-ids]`. Servers before
/// 7.0 report deleted entries as nil inside `entries`.
fn parse_claim_reply(reply: &[redis::Value]) -> Result<Vec<Delivery>, QueueError> {
    let entries = match reply.get(1) {
        Some(redis::Value::Array(entries)) => entries
            .iter()
            .filter(|e| !matches!(e, redis::Value::Nil))
            .cloned()
            .collect(),
        Some(other) => {
            return Err(QueueError::Redis(redis::RedisError::from((
                redis::ErrorKind::TypeError,
                "unexpected XAUTOCLAIM entries",
                format!("{:?}", other),
            ))))
        }
        None => return Ok(Vec::new()),
    };

    let claimed = redis::from_redis_value::<StreamClaimReply>(&redis::Value::Array(entries))?;
    Ok(claimed.ids.into_iter().map(to_delivery).collect())
}

#[async_trait]
impl MessageQueue for JobQueue {
    async fn publish(&self, payload: &str) -> Result<String, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let message_id: String = conn
            .xadd(&self.stream, "*", &[(PAYLOAD_FIELD, payload)])
            .await?;
        Ok(message_id)
    }

    async fn receive(
        &self,
        consumer: &str,
        max: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(consumer)
            .arg("COUNT")
            .arg(max)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .map(|r| {
                r.keys
                    .into_iter()
                    .flat_map(|key| key.ids)
                    .map(to_delivery)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        max: usize,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let reply: Vec<redis::Value> = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(max)
            .query_async(&mut conn)
            .await?;

        parse_claim_reply(&reply)
    }

    async fn touch(&self, consumer: &str, message_ids: &[String]) -> Result<(), QueueError> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Min idle 0 always succeeds and, with JUSTID, leaves the delivery count alone.
        let _: Vec<String> = redis::cmd("XCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(consumer)
            .arg(0)
            .arg(message_ids)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ack(&self, message_id: &str) -> Result<(), QueueError> {
        self.remove(message_id).await?;
        tracing::debug!(message_id, "Acknowledged message");
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        if requeue {
            let new_id = self.publish(&delivery.payload).await?;
            tracing::info!(message_id = %delivery.message_id, new_id = %new_id, "Message requeued");
        } else {
            tracing::warn!(message_id = %delivery.message_id, "Message rejected without requeue");
        }
        self.remove(&delivery.message_id).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
