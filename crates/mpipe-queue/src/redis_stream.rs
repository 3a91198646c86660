//! Event source over a Redis Streams consumer group.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use mpipe_models::DeliveryHandle;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::source::{EventSource, StreamRecord, PAYLOAD_FIELD};

/// Attempt counters expire after a day.
const ATTEMPTS_TTL_SECS: i64 = 86400;

/// Redis Streams consumer-group member.
pub struct RedisStreamSource {
    client: redis::Client,
    config: QueueConfig,
    consumer_name: String,
    last_claim: Mutex<Option<Instant>>,
}

impl RedisStreamSource {
    /// Create a source with a unique consumer name.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            consumer_name: format!("mpipe-{}", uuid::Uuid::new_v4()),
            config,
            last_claim: Mutex::new(None),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Create the consumer group (and stream) if they do not exist.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Append a notification to the stream. Used by producers and tests.
    pub async fn publish(
        &self,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> QueueResult<String> {
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.config.stream_name).arg("*").arg(PAYLOAD_FIELD).arg(payload);
        for (key, value) in headers {
            cmd.arg(key).arg(value);
        }
        let message_id: String = cmd.query_async(&mut conn).await?;
        Ok(message_id)
    }

    fn attempts_key(&self, delivery: &DeliveryHandle) -> String {
        format!("mpipe:attempts:{}:{}", delivery.stream, delivery.message_id)
    }

    fn to_record(&self, entry: &StreamId) -> StreamRecord {
        let mut payload = None;
        let mut headers = HashMap::new();

        for (field, value) in &entry.map {
            let Some(bytes) = value_bytes(value) else {
                continue;
            };
            if field == PAYLOAD_FIELD {
                payload = Some(bytes);
            } else {
                headers.insert(field.clone(), String::from_utf8_lossy(&bytes).to_string());
            }
        }

        StreamRecord {
            delivery: DeliveryHandle::new(&self.config.stream_name, &entry.id),
            payload,
            headers,
        }
    }

    /// Take over records that stayed unacknowledged for `claim_min_idle`.
    async fn reclaim_idle(&self) -> QueueResult<Vec<StreamRecord>> {
        {
            let mut last = self.last_claim.lock().await;
            if last.is_some_and(|at| at.elapsed() < self.config.claim_interval) {
                return Ok(Vec::new());
            }
            *last = Some(Instant::now());
        }

        let mut conn = self.connection().await?;
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(self.config.batch_size)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        if !claimed.ids.is_empty() {
            info!(count = claimed.ids.len(), "Reclaimed idle stream records");
        }
        Ok(claimed.ids.iter().map(|entry| self.to_record(entry)).collect())
    }

    async fn read_new(&self) -> QueueResult<Vec<StreamRecord>> {
        let mut conn = self.connection().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(self.config.batch_size)
            .arg("BLOCK")
            .arg(self.config.block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .iter()
                    .flat_map(|key| key.ids.iter())
                    .map(|entry| self.to_record(entry))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl EventSource for RedisStreamSource {
    async fn poll(&self) -> QueueResult<Vec<StreamRecord>> {
        let mut records = match self.reclaim_idle().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to reclaim idle records");
                Vec::new()
            }
        };
        if records.len() < self.config.batch_size {
            records.extend(self.read_new().await?);
        }
        Ok(records)
    }

    async fn ack(&self, delivery: &DeliveryHandle) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&delivery.stream)
            .arg(&self.config.consumer_group)
            .arg(&delivery.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&delivery.stream)
            .arg(&delivery.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.del::<_, ()>(self.attempts_key(delivery)).await?;

        debug!("Acknowledged record: {}", delivery);
        Ok(())
    }

    async fn dead_letter(
        &self,
        delivery: &DeliveryHandle,
        payload: &[u8],
        error: &str,
    ) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(delivery).await?;

        warn!("Moved record {} to dead letter stream: {}", delivery, error);
        Ok(())
    }

    async fn keep_alive(&self, deliveries: &[DeliveryHandle]) -> QueueResult<()> {
        if deliveries.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;

        // Claiming our own entries with min-idle 0 resets their idle time.
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg(0);
        for delivery in deliveries {
            cmd.arg(&delivery.message_id);
        }
        cmd.arg("JUSTID");
        let ids: Vec<String> = cmd.query_async(&mut conn).await?;

        debug!(requested = deliveries.len(), refreshed = ids.len(), "Refreshed in-flight records");
        Ok(())
    }

    async fn record_failure(&self, delivery: &DeliveryHandle) -> QueueResult<u32> {
        let mut conn = self.connection().await?;

        let key = self.attempts_key(delivery);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, ATTEMPTS_TTL_SECS).await?;
        Ok(count)
    }

    fn max_delivery_attempts(&self) -> u32 {
        self.config.max_delivery_attempts
    }
}

fn value_bytes(value: &redis::Value) -> Option<Vec<u8>> {
    match value {
        redis::Value::BulkString(bytes) => Some(bytes.clone()),
        redis::Value::SimpleString(s) => Some(s.clone().into_bytes()),
        _ => None,
    }
}
