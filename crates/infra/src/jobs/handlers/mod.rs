//! Job handlers and their shared dependencies.

pub mod analysis;
pub mod cleanup;
pub mod export;
pub mod notification;
pub mod report;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use safework_ai::TextCompletion;
use safework_core::SharedClock;

use crate::cache::KvStore;
use crate::storage::ObjectStore;
use crate::surveys::SurveyRepository;

use super::error::JobError;
use super::types::JobMessage;

pub use analysis::AnalysisHandler;
pub use cleanup::{CleanupHandler, CleanupReport};
pub use export::ExportHandler;
pub use notification::NotificationHandler;
pub use report::ReportHandler;

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, message: &JobMessage) -> Result<(), JobError>;
}

/// Tunables for the built-in handlers.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub download_ttl: Duration,
    pub notification_ttl: Duration,
    pub analysis_ttl: Duration,
    /// Artifacts strictly older than this are deleted by cleanup.
    pub retention: chrono::Duration,
    pub report_row_limit: u32,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            download_ttl: Duration::from_secs(24 * 3600),
            notification_ttl: Duration::from_secs(7 * 24 * 3600),
            analysis_ttl: Duration::from_secs(30 * 24 * 3600),
            retention: chrono::Duration::days(30),
            report_row_limit: 50,
        }
    }
}

/// Everything a handler may touch.
pub struct JobContext {
    pub surveys: SurveyRepository,
    pub cache: Arc<dyn KvStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub ai: Arc<dyn TextCompletion>,
    pub clock: SharedClock,
    pub settings: JobSettings,
}

/// Decode a payload; a missing payload reads as `{}`.
pub(crate) fn parse_payload<T: DeserializeOwned>(payload: &JsonValue) -> Result<T, JobError> {
    let value = if payload.is_null() {
        JsonValue::Object(Default::default())
    } else {
        payload.clone()
    };
    serde_json::from_value(value).map_err(|e| JobError::InvalidPayload(e.to_string()))
}
