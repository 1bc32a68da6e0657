use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;

use safework_core::{SharedClock, SystemClock};

use super::{MessageQueue, QueueError};
use crate::jobs::types::{DeadLetterEntry, Delivery, JobMessage, RetryOutcome, RetryPolicy};

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    seq: u64,
    /// Deliveries so far.
    attempts: u32,
    available_at: DateTime<Utc>,
    message: JobMessage,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    ready: Vec<Entry>,
    in_flight: HashMap<String, Entry>,
    dead: Vec<DeadLetterEntry>,
}

/// Process-local queue for development and tests.
///
/// Delivery order is priority (higher first), then enqueue order. Retried
/// messages become visible again after the policy's backoff delay.
pub struct InMemoryQueue {
    clock: SharedClock,
    policy: RetryPolicy,
    state: Mutex<State>,
}

impl InMemoryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_clock(policy, SystemClock::shared())
    }

    pub fn with_clock(policy: RetryPolicy, clock: SharedClock) -> Self {
        Self {
            clock,
            policy,
            state: Mutex::new(State::default()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn enqueue(&self, message: JobMessage) -> Result<String, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.next_seq += 1;
        let seq = state.next_seq;
        let id = format!("{}-{seq}", now.timestamp_millis());
        state.ready.push(Entry {
            id: id.clone(),
            seq,
            attempts: 0,
            available_at: now,
            message,
        });
        Ok(id)
    }

    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let mut due: Vec<(i32, u64)> = state
            .ready
            .iter()
            .filter(|e| e.available_at <= now)
            .map(|e| (e.message.priority, e.seq))
            .collect();
        due.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        due.truncate(max);

        let mut deliveries = Vec::with_capacity(due.len());
        for (_, seq) in due {
            let Some(pos) = state.ready.iter().position(|e| e.seq == seq) else {
                continue;
            };
            let mut entry = state.ready.remove(pos);
            entry.attempts += 1;
            deliveries.push(Delivery {
                id: entry.id.clone(),
                attempt: entry.attempts,
                message: entry.message.clone(),
            });
            state.in_flight.insert(entry.id.clone(), entry);
        }
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(&delivery.id)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.id.clone()))
    }

    async fn retry(&self, delivery: &Delivery, reason: &str) -> Result<RetryOutcome, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut entry = state
            .in_flight
            .remove(&delivery.id)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.id.clone()))?;

        if self.policy.allows_redelivery(entry.attempts) {
            let delay = self.policy.redelivery_delay(entry.attempts);
            entry.available_at = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(now);
            state.ready.push(entry);
            return Ok(RetryOutcome::Scheduled { delay });
        }

        warn!(message_id = %delivery.id, attempts = entry.attempts, reason, "message dead-lettered");
        state.dead.push(DeadLetterEntry {
            delivery: Delivery {
                id: entry.id,
                attempt: entry.attempts,
                message: entry.message,
            },
            reason: reason.to_string(),
            dead_lettered_at: now,
        });
        Ok(RetryOutcome::DeadLettered)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.dead.iter().rev().take(limit).cloned().collect())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let state = self.state.lock().await;
        Ok(state.ready.len() + state.in_flight.len())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
