//! `export`: rows → CSV/JSON artifact in object storage + download pointer in the cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, instrument};

use safework_survey::FormType;

use crate::cache::{keys, put_json};
use crate::exports::{DownloadPointer, ExportFormat, artifact_stamp, export_key, render_csv, render_json, scope};
use crate::jobs::error::JobError;
use crate::jobs::types::JobMessage;
use crate::surveys::SurveyFilter;

use super::{JobContext, JobHandler, parse_payload};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExportPayload {
    form_type: Option<FormType>,
    #[serde(default)]
    format: ExportFormat,
    /// Inclusive, by UTC submission date.
    start_date: Option<NaiveDate>,
    /// Inclusive, by UTC submission date.
    end_date: Option<NaiveDate>,
    #[serde(default)]
    include_deleted: bool,
    requested_by: Option<String>,
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

pub struct ExportHandler {
    ctx: Arc<JobContext>,
}

impl ExportHandler {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for ExportHandler {
    #[instrument(skip(self, message), fields(job_type = "export"), err)]
    async fn handle(&self, message: &JobMessage) -> Result<(), JobError> {
        let payload: ExportPayload = parse_payload(&message.payload)?;
        if let (Some(start), Some(end)) = (payload.start_date, payload.end_date) {
            if start > end {
                return Err(JobError::InvalidPayload(format!(
                    "start_date {start} is after end_date {end}"
                )));
            }
        }

        let filter = SurveyFilter {
            form_type: payload.form_type,
            include_deleted: payload.include_deleted,
            since: payload.start_date.map(start_of_day),
            until: payload
                .end_date
                .and_then(|d| d.succ_opt())
                .map(start_of_day),
            oldest_first: true,
            ..Default::default()
        };
        let records = self.ctx.surveys.list(&filter).await?;

        let now = self.ctx.clock.now();
        let body = match payload.format {
            ExportFormat::Csv => render_csv(&records)?,
            ExportFormat::Json => render_json(&records, now)?,
        };

        let key = export_key(payload.form_type, payload.format, now);
        let filename = format!(
            "safework_{}_{}.{}",
            scope(payload.form_type),
            artifact_stamp(now),
            payload.format.extension()
        );
        let mut metadata = BTreeMap::new();
        metadata.insert("filename".to_string(), filename.clone());
        metadata.insert("form_type".to_string(), scope(payload.form_type).to_string());
        metadata.insert("category".to_string(), "export".to_string());
        metadata.insert("generated_at".to_string(), now.to_rfc3339());
        metadata.insert("rows".to_string(), records.len().to_string());
        if let Some(requester) = &payload.requested_by {
            metadata.insert("requested_by".to_string(), requester.clone());
        }

        self.ctx
            .storage
            .put(&key, body, payload.format.content_type(), metadata)
            .await?;

        let ttl = self.ctx.settings.download_ttl;
        let pointer = DownloadPointer {
            key: key.clone(),
            filename: filename.clone(),
            content_type: payload.format.content_type().to_string(),
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24)),
        };
        put_json(self.ctx.cache.as_ref(), &keys::download(&filename), &pointer, Some(ttl)).await?;

        info!(key = %key, filename = %filename, rows = records.len(), "export written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::cache::get_json;
    use crate::storage::ObjectStore;
    use crate::jobs::handlers::testing::{harness, start};
    use crate::jobs::types::JobType;

    #[tokio::test]
    async fn export_writes_artifact_and_pointer() {
        let h = harness().await;
        h.seed("001", "a", 30, start() - Duration::days(2)).await;
        h.seed("001", "b", 31, start() - Duration::days(1)).await;
        h.seed("002", "c", 32, start() - Duration::days(1)).await;

        let handler = ExportHandler::new(h.ctx.clone());
        let msg = JobMessage::new(JobType::Export, json!({"form_type": "001", "requested_by": "admin"}), start());
        handler.handle(&msg).await.unwrap();

        let objects = h.ctx.storage.list("exports/001/").await.unwrap();
        assert_eq!(objects.len(), 1);
        let info = &objects[0];
        assert_eq!(info.key, "exports/001/20260615T120000Z.csv");
        assert_eq!(info.metadata["rows"], "2");
        assert_eq!(info.metadata["category"], "export");
        assert_eq!(info.metadata["requested_by"], "admin");

        let pointer: DownloadPointer = get_json(h.ctx.cache.as_ref(), "download:safework_001_20260615T120000Z.csv")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pointer.key, info.key);

        h.clock.advance(Duration::hours(24));
        let expired: Option<DownloadPointer> = get_json(h.ctx.cache.as_ref(), "download:safework_001_20260615T120000Z.csv")
            .await
            .unwrap();
        assert!(expired.is_none());
        // Pointer expiry does not delete the artifact.
        assert!(h.ctx.storage.get(&info.key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn export_honours_date_range_and_json_format() {
        let h = harness().await;
        h.seed("003", "old", 30, start() - Duration::days(10)).await;
        h.seed("003", "in", 31, start() - Duration::days(3)).await;

        let end = (start() - Duration::days(1)).date_naive();
        let begin = (start() - Duration::days(5)).date_naive();
        let msg = JobMessage::new(
            JobType::Export,
            json!({"form_type": "003", "format": "json", "start_date": begin, "end_date": end}),
            start(),
        );
        ExportHandler::new(h.ctx.clone()).handle(&msg).await.unwrap();

        let stored = h.ctx.storage.get("exports/003/20260615T120000Z.json").await.unwrap().unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&stored.body).unwrap();
        assert_eq!(doc["count"], 1);
        assert_eq!(doc["records"][0]["name"], "in");
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let h = harness().await;
        let handler = ExportHandler::new(h.ctx.clone());
        for payload in [
            json!({"format": "xml"}),
            json!({"form_type": "999"}),
            json!({"start_date": "2026-06-10", "end_date": "2026-06-01"}),
            json!("not an object"),
        ] {
            let err = handler
                .handle(&JobMessage::new(JobType::Export, payload, start()))
                .await
                .unwrap_err();
            assert!(matches!(err, JobError::InvalidPayload(_)), "{err}");
        }
        assert!(h.ctx.storage.list("").await.unwrap().is_empty());
    }
}
