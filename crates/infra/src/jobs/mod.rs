//! Asynchronous job pipeline.
//!
//! ## Flow
//!
//! - A `JobMessage` (`{type, payload, timestamp, priority}`) is enqueued on a `MessageQueue`
//! - The `QueueConsumer` receives a batch and hands it to the `JobDispatcher`
//! - The dispatcher looks up the handler registered for `type` and runs it
//! - Success acks the message; any failure, including a panic or an unknown
//!   type, retries it. Nothing is dropped silently.
//! - The queue applies the `RetryPolicy` and dead-letters exhausted messages
//!
//! ## Components
//!
//! - `handlers`: export, report, notification, analysis, cleanup
//! - `queue`: `InMemoryQueue`, `RedisStreamsQueue` (feature `redis`)
//! - `consumer`: background worker with graceful shutdown and counters
//! - `scheduler`: periodic `cleanup` enqueue

pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod queue;
pub mod scheduler;
pub mod types;

pub use consumer::{ConsumerConfig, ConsumerHandle, ConsumerStats, QueueConsumer};
pub use dispatcher::{BatchOutcome, JobDispatcher};
pub use error::JobError;
pub use handlers::{CleanupReport, JobContext, JobHandler, JobSettings};
pub use queue::{InMemoryQueue, MessageQueue, QueueError};
#[cfg(feature = "redis")]
pub use queue::RedisStreamsQueue;
pub use scheduler::{CleanupScheduler, SchedulerHandle, enqueue_cleanup};
pub use types::{DeadLetterEntry, Delivery, Disposition, JobMessage, JobType, RetryOutcome, RetryPolicy};
