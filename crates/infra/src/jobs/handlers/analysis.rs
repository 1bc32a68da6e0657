//! `analysis`: selected rows → structured AI analysis cached for 30 days.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use safework_ai::{AnalysisType, analysis_request};
use safework_core::SubmissionId;
use safework_survey::FormType;

use crate::cache::{keys, put_json};
use crate::jobs::error::JobError;
use crate::jobs::types::JobMessage;
use crate::surveys::SurveyFilter;

use super::{JobContext, JobHandler, parse_payload};

#[derive(Debug, Deserialize)]
struct AnalysisPayload {
    form_type: FormType,
    analysis_type: AnalysisType,
    submission_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
struct AnalysisRecord {
    form_type: FormType,
    analysis_type: AnalysisType,
    submission_ids: Vec<i64>,
    result: JsonValue,
    model: Option<String>,
    generated_at: chrono::DateTime<chrono::Utc>,
}

/// The collaborator is asked for JSON but may wrap it in a fenced block or
/// answer in prose; prose is kept under `text`.
fn parse_reply(raw: &str) -> JsonValue {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    match serde_json::from_str::<JsonValue>(body) {
        Ok(value @ JsonValue::Object(_)) | Ok(value @ JsonValue::Array(_)) => value,
        _ => serde_json::json!({ "text": trimmed }),
    }
}

pub struct AnalysisHandler {
    ctx: Arc<JobContext>,
}

impl AnalysisHandler {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for AnalysisHandler {
    #[instrument(skip(self, message), fields(job_type = "analysis"), err)]
    async fn handle(&self, message: &JobMessage) -> Result<(), JobError> {
        let payload: AnalysisPayload = parse_payload(&message.payload)?;
        if payload.submission_ids.is_empty() {
            return Err(JobError::InvalidPayload("submission_ids must not be empty".to_string()));
        }
        let ids = payload
            .submission_ids
            .iter()
            .map(|&id| {
                if id > 0 {
                    Ok(SubmissionId::new(id))
                } else {
                    Err(JobError::InvalidPayload(format!("submission id {id} must be positive")))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let records = self
            .ctx
            .surveys
            .list(&SurveyFilter {
                form_type: Some(payload.form_type),
                ids,
                oldest_first: true,
                ..Default::default()
            })
            .await?;
        if records.is_empty() {
            return Err(JobError::InvalidPayload(format!(
                "no {} submissions match the requested ids",
                payload.form_type
            )));
        }
        if records.len() < payload.submission_ids.len() {
            warn!(
                requested = payload.submission_ids.len(),
                found = records.len(),
                "some submissions were missing or deleted"
            );
        }

        let request = analysis_request(payload.analysis_type, payload.form_type, &records)?;
        let completion = self.ctx.ai.complete(request).await?;

        let now = self.ctx.clock.now();
        let record = AnalysisRecord {
            form_type: payload.form_type,
            analysis_type: payload.analysis_type,
            submission_ids: records.iter().map(|r| r.id.get()).collect(),
            result: parse_reply(&completion.text),
            model: completion.model,
            generated_at: now,
        };
        let key = keys::analysis(payload.form_type.code(), payload.analysis_type.as_str(), now);
        put_json(self.ctx.cache.as_ref(), &key, &record, Some(self.ctx.settings.analysis_ttl)).await?;

        info!(key = %key, rows = records.len(), "analysis cached");
        Ok(())
    }
}
