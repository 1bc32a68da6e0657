//! `notification`: log and persist the notification for 7 days.
//!
//! Delivery to email/SMS/push providers is an external collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::cache::{keys, put_json};
use crate::jobs::error::JobError;
use crate::jobs::types::JobMessage;

use super::{JobContext, JobHandler, parse_payload};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Channel {
    Email,
    Sms,
    Push,
}

fn default_channel() -> Channel {
    Channel::Email
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    recipients: Vec<String>,
    #[serde(default = "default_channel")]
    channel: Channel,
    subject: Option<String>,
    message: String,
}

#[derive(Debug, Serialize)]
struct NotificationRecord<'a> {
    recipients: &'a [String],
    channel: &'a Channel,
    subject: Option<&'a str>,
    message: &'a str,
    status: &'static str,
    created_at: chrono::DateTime<chrono::Utc>,
}

pub struct NotificationHandler {
    ctx: Arc<JobContext>,
}

impl NotificationHandler {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for NotificationHandler {
    #[instrument(skip(self, message), fields(job_type = "notification"), err)]
    async fn handle(&self, message: &JobMessage) -> Result<(), JobError> {
        let payload: NotificationPayload = parse_payload(&message.payload)?;
        let recipients: Vec<String> = payload
            .recipients
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if recipients.is_empty() {
            return Err(JobError::InvalidPayload("recipients must not be empty".to_string()));
        }

        let now = self.ctx.clock.now();
        let key = keys::notification(now, &Uuid::now_v7().to_string());
        let record = NotificationRecord {
            recipients: &recipients,
            channel: &payload.channel,
            subject: payload.subject.as_deref(),
            message: &payload.message,
            status: "logged",
            created_at: now,
        };
        put_json(
            self.ctx.cache.as_ref(),
            &key,
            &record,
            Some(self.ctx.settings.notification_ttl),
        )
        .await?;

        info!(key = %key, recipients = recipients.len(), channel = ?payload.channel, "notification recorded");
        Ok(())
    }
}
