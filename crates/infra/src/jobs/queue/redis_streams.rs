//! Redis Streams job queue (at-least-once delivery).
//!
//! - **Stream**: `safework:jobs`, one consumer group shared by all workers
//! - **Receive**: idle pending entries are reclaimed with XCLAIM first, then
//!   new entries are read with `XREADGROUP ... >`
//! - **Ack**: XACK + XDEL, the message is gone for good
//! - **Retry**: the entry stays pending and is reclaimed once it has been
//!   idle for `pending_timeout`; after `max_deliveries` deliveries it is moved
//!   to the dead-letter stream `safework:jobs:dlq`

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Value;
use redis::aio::MultiplexedConnection;
use tracing::{debug, instrument, warn};

use super::{MessageQueue, QueueError};
use crate::jobs::types::{DeadLetterEntry, Delivery, JobMessage, RetryOutcome, RetryPolicy};

const DEFAULT_STREAM_KEY: &str = "safework:jobs";
const DEFAULT_GROUP: &str = "safework-workers";

#[derive(Clone)]
pub struct RedisStreamsQueue {
    conn: MultiplexedConnection,
    stream_key: String,
    dlq_key: String,
    group: String,
    consumer: String,
    policy: RetryPolicy,
    pending_timeout: Duration,
}

impl RedisStreamsQueue {
    /// Connect and make sure the consumer group exists.
    pub async fn connect(
        redis_url: &str,
        consumer: impl Into<String>,
        policy: RetryPolicy,
        pending_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(|e| QueueError::Backend(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Backend(format!("connection failed: {e}")))?;

        let queue = Self {
            conn,
            stream_key: DEFAULT_STREAM_KEY.to_string(),
            dlq_key: format!("{DEFAULT_STREAM_KEY}:dlq"),
            group: DEFAULT_GROUP.to_string(),
            consumer: consumer.into(),
            policy,
            pending_timeout,
        };
        queue.ensure_group().await?;
        Ok(queue)
    }

    async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let created = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async::<_, ()>(&mut conn)
            .await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Backend(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    /// Claim entries idle longer than the pending timeout.
    async fn reclaim(&self, conn: &mut MultiplexedConnection, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let idle_ms = self.pending_timeout.as_millis() as u64;
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("IDLE")
            .arg(idle_ms)
            .arg("-")
            .arg("+")
            .arg(max)
            .query_async(&mut *conn)
            .await
            .map_err(|e| QueueError::Backend(format!("XPENDING failed: {e}")))?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let deliveries_so_far: HashMap<String, u64> =
            pending.iter().map(|(id, _, _, count)| (id.clone(), *count)).collect();
        let ids: Vec<&str> = pending.iter().map(|(id, ..)| id.as_str()).collect();

        let claimed: Value = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(idle_ms)
            .arg(&ids[..])
            .query_async(&mut *conn)
            .await
            .map_err(|e| QueueError::Backend(format!("XCLAIM failed: {e}")))?;

        let mut deliveries = Vec::new();
        for entry in bulk(claimed) {
            let (id, fields) = match parse_entry(entry) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable reclaimed entry");
                    continue;
                }
            };
            let attempt = deliveries_so_far.get(&id).copied().unwrap_or(0) as u32 + 1;
            let message = match message_from_fields(&fields) {
                Ok(message) => message,
                Err(err) => {
                    self.park(conn, &id, attempt, None, &err.to_string()).await?;
                    continue;
                }
            };
            let delivery = Delivery { id, attempt, message };
            if attempt > self.policy.max_deliveries {
                // The consumer holding it never reported back.
                self.park(conn, &delivery.id, attempt, Some(&delivery.message), "delivery attempts exhausted")
                    .await?;
                continue;
            }
            deliveries.push(delivery);
        }
        Ok(deliveries)
    }

    async fn read_new(&self, conn: &mut MultiplexedConnection, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(max)
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query_async(&mut *conn)
            .await
            .map_err(|e| QueueError::Backend(format!("XREADGROUP failed: {e}")))?;

        // [[stream_key, [entry, ...]], ...] or nil when nothing is new.
        let mut deliveries = Vec::new();
        for stream in bulk(reply) {
            let mut parts = bulk(stream).into_iter();
            let (Some(_name), Some(entries)) = (parts.next(), parts.next()) else {
                continue;
            };
            for entry in bulk(entries) {
                let (id, fields) = match parse_entry(entry) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        warn!(error = %err, "skipping unreadable stream entry");
                        continue;
                    }
                };
                match message_from_fields(&fields) {
                    Ok(message) => deliveries.push(Delivery { id, attempt: 1, message }),
                    Err(err) => self.park(conn, &id, 1, None, &err.to_string()).await?,
                }
            }
        }
        Ok(deliveries)
    }

    /// Move an entry to the dead-letter stream and drop it from the main stream.
    async fn park(
        &self,
        conn: &mut MultiplexedConnection,
        id: &str,
        attempt: u32,
        message: Option<&JobMessage>,
        reason: &str,
    ) -> Result<(), QueueError> {
        let raw = match message {
            Some(m) => serde_json::to_string(m).map_err(|e| QueueError::Serialization(e.to_string()))?,
            None => String::new(),
        };
        redis::cmd("XADD")
            .arg(&self.dlq_key)
            .arg("*")
            .arg("original_message_id")
            .arg(id)
            .arg("attempt")
            .arg(attempt)
            .arg("reason")
            .arg(reason)
            .arg("failed_at")
            .arg(Utc::now().to_rfc3339())
            .arg("message")
            .arg(raw)
            .query_async::<_, String>(&mut *conn)
            .await
            .map_err(|e| QueueError::Backend(format!("DLQ XADD failed: {e}")))?;
        self.remove(conn, id).await?;
        warn!(message_id = %id, attempt, reason, "message dead-lettered");
        Ok(())
    }

    async fn remove(&self, conn: &mut MultiplexedConnection, id: &str) -> Result<(), QueueError> {
        redis::pipe()
            .cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.stream_key)
            .arg(id)
            .ignore()
            .query_async::<_, ()>(&mut *conn)
            .await
            .map_err(|e| QueueError::Backend(format!("XACK/XDEL failed: {e}")))
    }
}

#[async_trait]
impl MessageQueue for RedisStreamsQueue {
    #[instrument(skip(self, message), fields(stream_key = %self.stream_key, job_type = %message.job_type), err)]
    async fn enqueue(&self, message: JobMessage) -> Result<String, QueueError> {
        let mut conn = self.conn.clone();
        enqueue_command(&self.stream_key, &message)?
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| QueueError::Backend(format!("XADD failed: {e}")))
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut deliveries = self.reclaim(&mut conn, max).await?;
        if deliveries.len() < max {
            let fresh = self.read_new(&mut conn, max - deliveries.len()).await?;
            deliveries.extend(fresh);
        }
        debug!(count = deliveries.len(), "received batch");
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        self.remove(&mut conn, &delivery.id).await
    }

    async fn retry(&self, delivery: &Delivery, reason: &str) -> Result<RetryOutcome, QueueError> {
        if self.policy.allows_redelivery(delivery.attempt) {
            debug!(message_id = %delivery.id, attempt = delivery.attempt, reason, "left pending for redelivery");
            return Ok(RetryOutcome::Scheduled {
                delay: self.pending_timeout,
            });
        }
        let mut conn = self.conn.clone();
        self.park(&mut conn, &delivery.id, delivery.attempt, Some(&delivery.message), reason)
            .await?;
        Ok(RetryOutcome::DeadLettered)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("XREVRANGE")
            .arg(&self.dlq_key)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Backend(format!("XREVRANGE failed: {e}")))?;

        let mut entries = Vec::new();
        for entry in bulk(reply) {
            let Ok((_, fields)) = parse_entry(entry) else {
                continue;
            };
            let Some(message) = fields
                .get("message")
                .and_then(|raw| serde_json::from_str::<JobMessage>(raw).ok())
            else {
                continue;
            };
            entries.push(DeadLetterEntry {
                delivery: Delivery {
                    id: fields.get("original_message_id").cloned().unwrap_or_default(),
                    attempt: fields.get("attempt").and_then(|a| a.parse().ok()).unwrap_or(0),
                    message,
                },
                reason: fields.get("reason").cloned().unwrap_or_default(),
                dead_lettered_at: fields
                    .get("failed_at")
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now),
            });
        }
        Ok(entries)
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("XLEN")
            .arg(&self.stream_key)
            .query_async::<_, usize>(&mut conn)
            .await
            .map_err(|e| QueueError::Backend(format!("XLEN failed: {e}")))
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Backend(format!("PING failed: {e}")))
    }
}

fn bulk(value: Value) -> Vec<Value> {
    match value {
        Value::Bulk(items) => items,
        _ => Vec::new(),
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

/// Entry format: `[id, [field1, value1, field2, value2, ...]]`.
fn parse_entry(entry: Value) -> Result<(String, HashMap<String, String>), QueueError> {
    let mut parts = bulk(entry).into_iter();
    let id = parts
        .next()
        .as_ref()
        .and_then(text)
        .ok_or_else(|| QueueError::Serialization("entry without id".to_string()))?;

    let mut fields = HashMap::new();
    let raw_fields = parts.next().map(bulk).unwrap_or_default();
    for pair in raw_fields.chunks(2) {
        if let [key, value] = pair {
            if let (Some(k), Some(v)) = (text(key), text(value)) {
                fields.insert(k, v);
            }
        }
    }
    Ok((id, fields))
}

fn message_from_fields(fields: &HashMap<String, String>) -> Result<JobMessage, QueueError> {
    let job_type = fields
        .get("type")
        .cloned()
        .ok_or_else(|| QueueError::Serialization("missing type field".to_string()))?;
    let payload = match fields.get("payload") {
        Some(raw) => serde_json::from_str(raw).map_err(|e| QueueError::Serialization(e.to_string()))?,
        None => serde_json::Value::Null,
    };
    let timestamp = fields
        .get("timestamp")
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let priority = fields.get("priority").and_then(|p| p.parse().ok()).unwrap_or(0);
    Ok(JobMessage {
        job_type,
        payload,
        timestamp,
        priority,
    })
}

/// `XADD` without a length cap: entries leave the stream only through ack or dead-lettering.
fn enqueue_command(stream_key: &str, message: &JobMessage) -> Result<redis::Cmd, QueueError> {
    let payload = serde_json::to_string(&message.payload).map_err(|e| QueueError::Serialization(e.to_string()))?;
    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream_key)
        .arg("*")
        .arg("type")
        .arg(&message.job_type)
        .arg("priority")
        .arg(message.priority)
        .arg("timestamp")
        .arg(message.timestamp.to_rfc3339())
        .arg("payload")
        .arg(payload);
    Ok(cmd)
}
