//! `cleanup`: delete generated artifacts strictly older than the retention period.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::jobs::error::JobError;
use crate::jobs::types::JobMessage;

use super::{JobContext, JobHandler};

/// Prefixes scanned by cleanup. Nothing else in the object store is touched.
pub const ARTIFACT_PREFIXES: [&str; 2] = ["exports/", "reports/"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub scanned: usize,
    pub deleted: usize,
    pub kept: usize,
}

pub struct CleanupHandler {
    ctx: Arc<JobContext>,
}

impl CleanupHandler {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    /// One sweep. Individual delete failures do not stop the sweep; the
    /// first one is returned after every candidate has been tried.
    pub async fn sweep(&self, retention: chrono::Duration) -> Result<CleanupReport, JobError> {
        let now = self.ctx.clock.now();
        let mut report = CleanupReport::default();
        let mut first_error = None;

        for prefix in ARTIFACT_PREFIXES {
            for object in self.ctx.storage.list(prefix).await? {
                report.scanned += 1;
                let age = now - object.uploaded_at;
                if age <= retention {
                    report.kept += 1;
                    continue;
                }
                match self.ctx.storage.delete(&object.key).await {
                    Ok(_) => {
                        report.deleted += 1;
                        info!(key = %object.key, age_days = age.num_days(), "expired artifact deleted");
                    }
                    Err(err) => {
                        warn!(key = %object.key, error = %err, "failed to delete expired artifact");
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(report),
        }
    }
}

#[async_trait]
impl JobHandler for CleanupHandler {
    /// The retention window comes from configuration only; payload fields are ignored.
    #[instrument(skip(self, _message), fields(job_type = "cleanup"), err)]
    async fn handle(&self, _message: &JobMessage) -> Result<(), JobError> {
        let report = self.sweep(self.ctx.settings.retention).await?;
        info!(
            scanned = report.scanned,
            deleted = report.deleted,
            kept = report.kept,
            "cleanup finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::jobs::handlers::testing::{harness, start};
    use crate::jobs::types::JobType;
    use crate::storage::ObjectStore;

    async fn upload(store: &dyn ObjectStore, key: &str) {
        store.put(key, b"x".to_vec(), "text/plain", BTreeMap::new()).await.unwrap();
    }

    #[tokio::test]
    async fn deletes_only_artifacts_past_retention() {
        let h = harness().await;
        h.clock.set(start() - Duration::days(40));
        upload(h.ctx.storage.as_ref(), "exports/001/old.csv").await;
        h.clock.set(start() - Duration::days(5));
        upload(h.ctx.storage.as_ref(), "reports/all/recent.md").await;
        upload(h.ctx.storage.as_ref(), "uploads/keep.bin").await;
        h.clock.set(start());

        CleanupHandler::new(h.ctx.clone())
            .handle(&JobMessage::new(JobType::Cleanup, json!({}), start()))
            .await
            .unwrap();

        assert!(h.ctx.storage.get("exports/001/old.csv").await.unwrap().is_none());
        assert!(h.ctx.storage.get("reports/all/recent.md").await.unwrap().is_some());
        assert!(h.ctx.storage.get("uploads/keep.bin").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn retention_boundary_is_strict() {
        let h = harness().await;
        h.clock.set(start() - (Duration::days(30) - Duration::hours(1)));
        upload(h.ctx.storage.as_ref(), "exports/all/younger.csv").await;
        h.clock.set(start() - Duration::days(30));
        upload(h.ctx.storage.as_ref(), "exports/all/exact.csv").await;
        h.clock.set(start() - (Duration::days(30) + Duration::hours(1)));
        upload(h.ctx.storage.as_ref(), "exports/all/older.csv").await;
        h.clock.set(start());

        let report = CleanupHandler::new(h.ctx.clone())
            .sweep(Duration::days(30))
            .await
            .unwrap();
        assert_eq!(
            report,
            CleanupReport {
                scanned: 3,
                deleted: 1,
                kept: 2
            }
        );
        assert!(h.ctx.storage.get("exports/all/exact.csv").await.unwrap().is_some());
        assert!(h.ctx.storage.get("exports/all/older.csv").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn payload_cannot_shorten_retention() {
        let h = harness().await;
        h.clock.set(start() - Duration::days(31));
        upload(h.ctx.storage.as_ref(), "exports/001/stale.csv").await;
        h.clock.set(start() - Duration::days(29));
        upload(h.ctx.storage.as_ref(), "reports/001/fresh.md").await;
        h.clock.set(start() - Duration::seconds(5));
        upload(h.ctx.storage.as_ref(), "exports/001/just_written.csv").await;
        h.clock.set(start());

        CleanupHandler::new(h.ctx.clone())
            .handle(&JobMessage::new(JobType::Cleanup, json!({"retention_days": 0}), start()))
            .await
            .unwrap();

        assert!(h.ctx.storage.get("exports/001/stale.csv").await.unwrap().is_none());
        assert!(h.ctx.storage.get("reports/001/fresh.md").await.unwrap().is_some());
        assert!(h.ctx.storage.get("exports/001/just_written.csv").await.unwrap().is_some());
    }
}
