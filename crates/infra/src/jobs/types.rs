//! Job message types and redelivery policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Known job types. Messages carry the type as a string so unknown types
/// can still be received and retried rather than dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Export,
    Report,
    Notification,
    Analysis,
    Cleanup,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::Export,
        JobType::Report,
        JobType::Notification,
        JobType::Analysis,
        JobType::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Export => "export",
            JobType::Report => "report",
            JobType::Notification => "notification",
            JobType::Analysis => "analysis",
            JobType::Cleanup => "cleanup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        JobType::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of asynchronous work as it travels on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Higher runs first.
    #[serde(default)]
    pub priority: i32,
}

impl JobMessage {
    pub fn new(job_type: JobType, payload: JsonValue, timestamp: DateTime<Utc>) -> Self {
        Self {
            job_type: job_type.as_str().to_string(),
            payload,
            timestamp,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A message handed to the consumer by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Queue-assigned message id.
    pub id: String,
    /// 1 on first delivery.
    pub attempt: u32,
    pub message: JobMessage,
}

/// Consumer verdict for one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Retry { reason: String },
}

impl Disposition {
    pub fn is_ack(&self) -> bool {
        matches!(self, Disposition::Ack)
    }
}

/// What the queue did with a retried message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Scheduled { delay: Duration },
    DeadLettered,
}

/// Redelivery budget for a message, keyed on its delivery count.
///
/// A message that failed its `n`th delivery waits `base_delay * 2^(n-1)`
/// (capped at `max_delay`) before the next one; once `max_deliveries`
/// deliveries have failed it is dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_deliveries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

impl RetryPolicy {
    /// Doubling backoff from 1s up to 5 minutes.
    pub fn new(max_deliveries: u32) -> Self {
        Self {
            max_deliveries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }

    /// Same delay before every redelivery.
    pub fn fixed(max_deliveries: u32, delay: Duration) -> Self {
        Self {
            max_deliveries,
            base_delay: delay,
            max_delay: delay,
        }
    }

    /// Wait before redelivering a message whose `deliveries`th delivery failed.
    pub fn redelivery_delay(&self, deliveries: u32) -> Duration {
        let doublings = deliveries.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1 << doublings)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// `true` while the budget allows another delivery.
    pub fn allows_redelivery(&self, deliveries: u32) -> bool {
        deliveries < self.max_deliveries
    }
}

/// Message parked after exhausting its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub delivery: Delivery,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}
