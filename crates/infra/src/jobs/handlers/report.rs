//! `report`: most recent rows per form type → AI narrative → Markdown artifact.
//!
//! The AI call is not retried here; a failure fails the message.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

use safework_ai::report_request;
use safework_survey::FormType;

use crate::cache::{keys, put_json};
use crate::exports::{DownloadPointer, MARKDOWN_CONTENT_TYPE, artifact_stamp, report_key, scope};
use crate::jobs::error::JobError;
use crate::jobs::types::JobMessage;
use crate::surveys::SurveyFilter;

use super::{JobContext, JobHandler, parse_payload};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReportPayload {
    /// Empty: one report across all forms.
    #[serde(default)]
    form_types: Vec<FormType>,
    limit: Option<u32>,
    requested_by: Option<String>,
}

pub struct ReportHandler {
    ctx: Arc<JobContext>,
}

impl ReportHandler {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    async fn write_report(
        &self,
        form_type: Option<FormType>,
        limit: u32,
        requested_by: Option<&str>,
    ) -> Result<String, JobError> {
        let records = self
            .ctx
            .surveys
            .list(&SurveyFilter {
                form_type,
                limit: Some(limit),
                ..Default::default()
            })
            .await?;

        let request = report_request(form_type, &records)?;
        let completion = self.ctx.ai.complete(request).await?;

        let now = self.ctx.clock.now();
        let title = match form_type {
            Some(f) => format!("{} ({})", f.title(), f.code()),
            None => "All forms".to_string(),
        };
        let body = format!(
            "# Safety report: {title}\n\n- Generated: {}\n- Rows analysed: {}\n\n{}\n",
            now.to_rfc3339(),
            records.len(),
            completion.text.trim()
        );

        let key = report_key(form_type, now);
        let filename = format!("safework_report_{}_{}.md", scope(form_type), artifact_stamp(now));
        let mut metadata = BTreeMap::new();
        metadata.insert("filename".to_string(), filename.clone());
        metadata.insert("form_type".to_string(), scope(form_type).to_string());
        metadata.insert("category".to_string(), "report".to_string());
        metadata.insert("generated_at".to_string(), now.to_rfc3339());
        metadata.insert("rows".to_string(), records.len().to_string());
        if let Some(model) = completion.model {
            metadata.insert("model".to_string(), model);
        }
        if let Some(requester) = requested_by {
            metadata.insert("requested_by".to_string(), requester.to_string());
        }

        self.ctx
            .storage
            .put(&key, body.into_bytes(), MARKDOWN_CONTENT_TYPE, metadata)
            .await?;

        let ttl = self.ctx.settings.download_ttl;
        let pointer = DownloadPointer {
            key: key.clone(),
            filename: filename.clone(),
            content_type: MARKDOWN_CONTENT_TYPE.to_string(),
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24)),
        };
        put_json(self.ctx.cache.as_ref(), &keys::download(&filename), &pointer, Some(ttl)).await?;

        info!(key = %key, rows = records.len(), "report written");
        Ok(key)
    }
}

#[async_trait]
impl JobHandler for ReportHandler {
    #[instrument(skip(self, message), fields(job_type = "report"), err)]
    async fn handle(&self, message: &JobMessage) -> Result<(), JobError> {
        let payload: ReportPayload = parse_payload(&message.payload)?;
        let limit = payload.limit.unwrap_or(self.ctx.settings.report_row_limit).max(1);
        let requested_by = payload.requested_by.as_deref();

        if payload.form_types.is_empty() {
            self.write_report(None, limit, requested_by).await?;
        } else {
            for form_type in payload.form_types {
                self.write_report(Some(form_type), limit, requested_by).await?;
            }
        }
        Ok(())
    }
}
