//! Handler registry: `type` → handler, one disposition per delivered message.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::handlers::{
    AnalysisHandler, CleanupHandler, ExportHandler, JobContext, JobHandler, NotificationHandler,
    ReportHandler,
};
use super::types::{Delivery, Disposition, JobType};

/// Result of one batch, in delivery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub results: Vec<(String, Disposition)>,
}

impl BatchOutcome {
    pub fn acked(&self) -> usize {
        self.results.iter().filter(|(_, d)| d.is_ack()).count()
    }

    pub fn retried(&self) -> usize {
        self.results.len() - self.acked()
    }

    pub fn disposition(&self, id: &str) -> Option<&Disposition> {
        self.results.iter().find(|(i, _)| i == id).map(|(_, d)| d)
    }
}

#[derive(Clone, Default)]
pub struct JobDispatcher {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the five built-in job types.
    pub fn with_default_handlers(ctx: Arc<JobContext>) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(JobType::Export, Arc::new(ExportHandler::new(ctx.clone())));
        dispatcher.register(JobType::Report, Arc::new(ReportHandler::new(ctx.clone())));
        dispatcher.register(JobType::Notification, Arc::new(NotificationHandler::new(ctx.clone())));
        dispatcher.register(JobType::Analysis, Arc::new(AnalysisHandler::new(ctx.clone())));
        dispatcher.register(JobType::Cleanup, Arc::new(CleanupHandler::new(ctx)));
        dispatcher
    }

    /// Replaces any handler already registered for `job_type`.
    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.as_str().to_string(), handler);
    }

    pub fn handles(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Run the handler for one delivery.
    ///
    /// The handler runs on its own task so a panic is contained and turned
    /// into a retry like any other failure.
    #[instrument(
        skip(self, delivery),
        fields(message_id = %delivery.id, job_type = %delivery.message.job_type, attempt = delivery.attempt)
    )]
    pub async fn dispatch(&self, delivery: &Delivery) -> Disposition {
        let Some(handler) = self.handlers.get(&delivery.message.job_type).cloned() else {
            warn!("no handler registered; message will be retried");
            return Disposition::Retry {
                reason: format!("no handler registered for job type {:?}", delivery.message.job_type),
            };
        };

        let message = delivery.message.clone();
        let joined = tokio::spawn(async move { handler.handle(&message).await }).await;

        match joined {
            Ok(Ok(())) => {
                debug!("job handled");
                Disposition::Ack
            }
            Ok(Err(err)) => {
                warn!(error = %err, "job handler failed");
                Disposition::Retry {
                    reason: err.to_string(),
                }
            }
            Err(join_err) => {
                warn!(error = %join_err, "job handler panicked");
                Disposition::Retry {
                    reason: format!("handler panicked: {join_err}"),
                }
            }
        }
    }

    /// Messages are handled one after another; a failure never stops the batch.
    pub async fn process_batch(&self, batch: &[Delivery]) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            results: Vec::with_capacity(batch.len()),
        };
        for delivery in batch {
            let disposition = self.dispatch(delivery).await;
            outcome.results.push((delivery.id.clone(), disposition));
        }
        outcome
    }
}
