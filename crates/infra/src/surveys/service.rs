//! Submission Service.
//!
//! `submit`: normalize → canonical row (authoritative) → mirror entry (best effort)
//! → audit entry (best effort). Only validation and the relational write can fail
//! the call; mirror and audit failures are logged, counted and reported as flags.
//!
//! Retried client submissions are not deduplicated: every call creates a new row.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tracing::{Span, info, instrument, warn};

use safework_core::{ActorId, SharedClock, SubmissionId};
use safework_survey::{Payload, SurveyRecord, ValidationError, merge_changes, normalize};

use crate::cache::{CacheError, KvStore, get_json, keys, put_json};
use crate::db::DbError;
use crate::metrics::PipelineMetrics;

use super::audit::{AuditLog, actions};
use super::repository::{SurveyFilter, SurveyRepository};

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to persist submission: {0}")]
    Persistence(#[from] DbError),

    /// Lookups and admin operations only.
    #[error("submission {0} not found")]
    NotFound(SubmissionId),
}

/// Request context recorded in the audit entry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmissionOutcome {
    pub submission_id: SubmissionId,
    /// Mirror entry written to the cache store.
    pub mirrored: bool,
    /// Audit entry appended.
    pub audited: bool,
}

pub struct SubmissionService {
    repo: SurveyRepository,
    audit: AuditLog,
    cache: Arc<dyn KvStore>,
    clock: SharedClock,
    metrics: Arc<PipelineMetrics>,
    mirror_ttl: Duration,
}

impl SubmissionService {
    pub fn new(
        repo: SurveyRepository,
        audit: AuditLog,
        cache: Arc<dyn KvStore>,
        clock: SharedClock,
        metrics: Arc<PipelineMetrics>,
        mirror_ttl: Duration,
    ) -> Self {
        Self {
            repo,
            audit,
            cache,
            clock,
            metrics,
            mirror_ttl,
        }
    }

    pub fn repository(&self) -> &SurveyRepository {
        &self.repo
    }

    #[instrument(skip(self, payload, meta), fields(actor = %actor, form_type, submission_id))]
    pub async fn submit(
        &self,
        payload: &Payload,
        actor: &ActorId,
        meta: &RequestMeta,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let normalized = normalize(payload)?;
        let span = Span::current();
        span.record("form_type", normalized.form_type.code());

        let now = self.clock.now();
        let submitter = (!actor.is_anonymous()).then_some(actor);
        let record = self.repo.insert(&normalized, submitter, now).await?;
        span.record("submission_id", record.id.get());
        self.metrics.record_submission();

        let mirrored = self.write_mirror(&record).await;
        let audited = self
            .write_audit(
                actor,
                actions::SURVEY_SUBMITTED,
                json!({
                    "submission_id": record.id,
                    "form_type": record.form_type,
                    "has_symptoms": record.scalars.has_symptoms,
                    "pain_areas": record.selections.get("pain_areas").map(Vec::len).unwrap_or(0),
                    "request": meta,
                }),
            )
            .await;

        info!(mirrored, audited, "survey submitted");
        Ok(SubmissionOutcome {
            submission_id: record.id,
            mirrored,
            audited,
        })
    }

    /// Authoritative lookup, deleted records included.
    pub async fn get(&self, id: SubmissionId) -> Result<SurveyRecord, SubmissionError> {
        self.repo.get(id).await?.ok_or(SubmissionError::NotFound(id))
    }

    pub async fn list(&self, filter: &SurveyFilter) -> Result<(Vec<SurveyRecord>, i64), SubmissionError> {
        let items = self.repo.list(filter).await?;
        let total = self.repo.count(filter).await?;
        Ok((items, total))
    }

    /// Administrative edit: merge `changes` into the stored responses and re-normalise.
    #[instrument(skip(self, changes), fields(submission_id = %id, actor = %actor))]
    pub async fn update(
        &self,
        id: SubmissionId,
        changes: &Payload,
        actor: &ActorId,
    ) -> Result<SurveyRecord, SubmissionError> {
        let existing = self.get(id).await?;
        let merged = merge_changes(existing.form_type, &existing.responses, changes)?;
        let normalized = normalize(&merged)?;

        let now = self.clock.now();
        if !self.repo.update_content(id, &normalized, now).await? {
            return Err(SubmissionError::NotFound(id));
        }

        let record = SurveyRecord {
            scalars: normalized.scalars,
            selections: normalized.selections,
            responses: normalized.responses,
            updated_at: now,
            ..existing
        };

        self.write_mirror(&record).await;
        let mut changed: Vec<&String> = changes.keys().collect();
        changed.sort();
        self.write_audit(
            actor,
            actions::SURVEY_UPDATED,
            json!({ "submission_id": id, "changed_fields": changed }),
        )
        .await;

        info!("survey updated");
        Ok(record)
    }

    /// Soft delete. Repeating it on a deleted record is a no-op success.
    #[instrument(skip(self), fields(submission_id = %id, actor = %actor))]
    pub async fn soft_delete(&self, id: SubmissionId, actor: &ActorId) -> Result<SurveyRecord, SubmissionError> {
        let now = self.clock.now();
        if !self.repo.soft_delete(id, now).await? {
            return Err(SubmissionError::NotFound(id));
        }
        let record = self.get(id).await?;

        self.write_mirror(&record).await;
        self.write_audit(actor, actions::SURVEY_DELETED, json!({ "submission_id": id }))
            .await;

        info!("survey soft-deleted");
        Ok(record)
    }

    /// Recovery read from the cache store. Never authoritative.
    pub async fn get_mirror(&self, id: SubmissionId) -> Result<Option<SurveyRecord>, CacheError> {
        get_json(self.cache.as_ref(), &keys::mirror(id)).await
    }

    async fn write_mirror(&self, record: &SurveyRecord) -> bool {
        let key = keys::mirror(record.id);
        match put_json(self.cache.as_ref(), &key, record, Some(self.mirror_ttl)).await {
            Ok(()) => true,
            Err(e) => {
                self.metrics.record_mirror_failure();
                warn!(key = %key, error = %e, "mirror write failed; relational row is authoritative");
                false
            }
        }
    }

    async fn write_audit(&self, actor: &ActorId, action: &str, details: JsonValue) -> bool {
        match self.audit.append(actor, action, &details, self.clock.now()).await {
            Ok(_) => true,
            Err(e) => {
                self.metrics.record_audit_failure();
                warn!(action, error = %e, "audit log write failed");
                false
            }
        }
    }
}
