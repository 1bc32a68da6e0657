//! Queue consumer: receive a batch, dispatch it, report each disposition back.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dispatcher::{BatchOutcome, JobDispatcher};
use super::queue::{MessageQueue, QueueError};
use super::types::{Disposition, RetryOutcome};
use crate::metrics::PipelineMetrics;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Name for logging
    pub name: String,
    /// Maximum messages per batch
    pub batch_size: usize,
    /// Sleep between polls when the queue is empty
    pub poll_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            name: "job-consumer".to_string(),
            batch_size: 10,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl ConsumerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Consumer runtime statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub batches: u64,
    pub processed: u64,
    pub acked: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub queue_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    batches: AtomicU64,
    processed: AtomicU64,
    acked: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    queue_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            batches: self.batches.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            queue_errors: self.queue_errors.load(Ordering::Relaxed),
        }
    }
}

pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    dispatcher: JobDispatcher,
    metrics: Arc<PipelineMetrics>,
    config: ConsumerConfig,
    counters: Arc<Counters>,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        dispatcher: JobDispatcher,
        metrics: Arc<PipelineMetrics>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            metrics,
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }

    /// Receive and process one batch.
    ///
    /// Every delivered message is either acked or retried before this returns.
    /// A failure to report a disposition is counted and logged; the queue
    /// redelivers such messages on its own.
    pub async fn run_once(&self) -> Result<BatchOutcome, QueueError> {
        let batch = self.queue.receive(self.config.batch_size).await.inspect_err(|_| {
            self.counters.queue_errors.fetch_add(1, Ordering::Relaxed);
        })?;
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }

        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        let outcome = self.dispatcher.process_batch(&batch).await;

        for (delivery, (_, disposition)) in batch.iter().zip(outcome.results.iter()) {
            self.counters.processed.fetch_add(1, Ordering::Relaxed);
            match disposition {
                Disposition::Ack => match self.queue.ack(delivery).await {
                    Ok(()) => {
                        self.counters.acked.fetch_add(1, Ordering::Relaxed);
                        self.metrics.record_job_acked();
                    }
                    Err(err) => {
                        self.counters.queue_errors.fetch_add(1, Ordering::Relaxed);
                        error!(message_id = %delivery.id, error = %err, "failed to ack message");
                    }
                },
                Disposition::Retry { reason } => match self.queue.retry(delivery, reason).await {
                    Ok(RetryOutcome::Scheduled { delay }) => {
                        self.counters.retried.fetch_add(1, Ordering::Relaxed);
                        self.metrics.record_job_retried();
                        warn!(
                            message_id = %delivery.id,
                            attempt = delivery.attempt,
                            delay_ms = delay.as_millis() as u64,
                            reason = %reason,
                            "message scheduled for retry"
                        );
                    }
                    Ok(RetryOutcome::DeadLettered) => {
                        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                        self.metrics.record_job_dead_lettered();
                    }
                    Err(err) => {
                        self.counters.queue_errors.fetch_add(1, Ordering::Relaxed);
                        error!(message_id = %delivery.id, error = %err, "failed to retry message");
                    }
                },
            }
        }

        debug!(acked = outcome.acked(), retried = outcome.retried(), "batch processed");
        Ok(outcome)
    }

    /// Run the receive loop on a tokio task until shutdown is requested.
    pub fn spawn(self) -> ConsumerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let counters = self.counters.clone();

        let join = tokio::spawn(async move {
            info!(consumer = %self.config.name, "job consumer started");
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                let idle = match self.run_once().await {
                    Ok(outcome) => outcome.results.is_empty(),
                    Err(err) => {
                        warn!(consumer = %self.config.name, error = %err, "queue receive failed");
                        true
                    }
                };
                if idle {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            info!(consumer = %self.config.name, "job consumer stopped");
        });

        ConsumerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            counters,
        }
    }
}

/// Handle to control a running consumer.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl ConsumerHandle {
    /// Request graceful shutdown and wait for the in-progress batch to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use super::*;
    use crate::jobs::handlers::testing::{harness, start};
    use crate::jobs::queue::InMemoryQueue;
    use crate::jobs::types::{JobMessage, JobType, RetryPolicy};
    use crate::storage::ObjectStore;

    fn consumer(queue: Arc<InMemoryQueue>, dispatcher: JobDispatcher) -> (QueueConsumer, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let consumer = QueueConsumer::new(
            queue,
            dispatcher,
            metrics.clone(),
            ConsumerConfig::default().with_poll_interval(Duration::from_millis(10)),
        );
        (consumer, metrics)
    }

    #[tokio::test]
    async fn cleanup_message_deletes_only_old_artifact() {
        let h = harness().await;
        h.clock.set(start() - ChronoDuration::days(40));
        h.ctx
            .storage
            .put("exports/001/old.csv", b"a".to_vec(), "text/csv", Default::default())
            .await
            .unwrap();
        h.clock.set(start() - ChronoDuration::days(5));
        h.ctx
            .storage
            .put("exports/001/new.csv", b"b".to_vec(), "text/csv", Default::default())
            .await
            .unwrap();
        h.clock.set(start());

        let queue = Arc::new(InMemoryQueue::with_clock(RetryPolicy::default(), h.clock.clone()));
        queue
            .enqueue(serde_json::from_value(json!({"type": "cleanup"})).unwrap())
            .await
            .unwrap();

        let (consumer, metrics) = consumer(queue.clone(), JobDispatcher::with_default_handlers(h.ctx.clone()));
        let outcome = consumer.run_once().await.unwrap();

        assert_eq!(outcome.acked(), 1);
        assert_eq!(queue.depth().await.unwrap(), 0);
        assert_eq!(metrics.snapshot().jobs_acked, 1);
        let keys: Vec<String> = h.ctx.storage.list("exports/").await.unwrap().into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["exports/001/new.csv".to_string()]);
    }

    #[tokio::test]
    async fn failing_message_is_retried_then_dead_lettered() {
        let h = harness().await;
        let policy = RetryPolicy::fixed(2, Duration::ZERO);
        let queue = Arc::new(InMemoryQueue::with_clock(policy, h.clock.clone()));
        queue
            .enqueue(JobMessage::new(JobType::Export, json!({"format": "xml"}), start()))
            .await
            .unwrap();

        let (consumer, metrics) = consumer(queue.clone(), JobDispatcher::with_default_handlers(h.ctx.clone()));
        assert_eq!(consumer.run_once().await.unwrap().retried(), 1);
        assert_eq!(consumer.run_once().await.unwrap().retried(), 1);
        assert!(consumer.run_once().await.unwrap().results.is_empty());

        let stats = consumer.stats();
        assert_eq!((stats.processed, stats.retried, stats.dead_lettered), (2, 1, 1));
        assert_eq!(metrics.snapshot().jobs_dead_lettered, 1);
        assert_eq!(queue.dead_letters(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn spawned_consumer_drains_queue_and_shuts_down() {
        let h = harness().await;
        let queue = Arc::new(InMemoryQueue::with_clock(RetryPolicy::default(), h.clock.clone()));
        for _ in 0..3 {
            queue
                .enqueue(JobMessage::new(
                    JobType::Notification,
                    json!({"recipients": ["ops@example.com"], "message": "hi"}),
                    start(),
                ))
                .await
                .unwrap();
        }

        let (consumer, _) = consumer(queue.clone(), JobDispatcher::with_default_handlers(h.ctx.clone()));
        let handle = consumer.spawn();
        for _ in 0..200 {
            if handle.stats().acked == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.stats().acked, 3);
        handle.shutdown().await;
        assert_eq!(queue.depth().await.unwrap(), 0);
    }
}
