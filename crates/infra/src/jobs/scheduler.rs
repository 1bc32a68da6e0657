//! Periodic enqueue of the `cleanup` job.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use safework_core::SharedClock;

use super::queue::{MessageQueue, QueueError};
use super::types::{JobMessage, JobType};

/// Enqueue one `cleanup` job with the default retention.
pub async fn enqueue_cleanup(queue: &dyn MessageQueue, clock: &SharedClock) -> Result<String, QueueError> {
    queue
        .enqueue(JobMessage::new(JobType::Cleanup, json!({}), clock.now()))
        .await
}

pub struct CleanupScheduler {
    queue: Arc<dyn MessageQueue>,
    clock: SharedClock,
    interval: Duration,
}

impl CleanupScheduler {
    pub fn new(queue: Arc<dyn MessageQueue>, clock: SharedClock, interval: Duration) -> Self {
        Self {
            queue,
            clock,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    /// The first job is enqueued one full interval after start.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = self.interval.as_secs(), "cleanup scheduler started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match enqueue_cleanup(self.queue.as_ref(), &self.clock).await {
                            Ok(id) => info!(message_id = %id, "cleanup job enqueued"),
                            Err(err) => warn!(error = %err, "failed to enqueue cleanup job"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        SchedulerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}
