//! Job queue adapters.
//!
//! A delivered message stays invisible to other receivers until the consumer
//! either acks it (removed for good) or retries it (redelivered later, or
//! parked in the dead-letter list once the retry budget is spent).

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_streams;

use async_trait::async_trait;
use thiserror::Error;

use super::types::{DeadLetterEntry, Delivery, JobMessage, RetryOutcome};

pub use in_memory::InMemoryQueue;
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("message could not be (de)serialized: {0}")]
    Serialization(String),

    #[error("delivery {0} is not in flight")]
    UnknownDelivery(String),
}

#[async_trait]
pub trait MessageQueue: Send + Sync + 'static {
    /// Returns the queue-assigned message id.
    async fn enqueue(&self, message: JobMessage) -> Result<String, QueueError>;

    /// Up to `max` messages that are due for delivery.
    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    async fn retry(&self, delivery: &Delivery, reason: &str) -> Result<RetryOutcome, QueueError>;

    /// Most recent first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError>;

    /// Messages waiting or in flight.
    async fn depth(&self) -> Result<usize, QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}
