//! Canonical survey record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use safework_core::{ActorId, DomainError, SubmissionId};

use crate::form::FormType;

/// Lifecycle state of a record. Soft delete only.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyStatus {
    Submitted,
    Deleted,
}

impl SurveyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurveyStatus::Submitted => "submitted",
            SurveyStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "submitted" => Ok(SurveyStatus::Submitted),
            "deleted" => Ok(SurveyStatus::Deleted),
            other => Err(DomainError::validation(format!("unknown survey status: {other}"))),
        }
    }
}

/// Fixed projection of the most queried fields.
///
/// `None` where the form does not carry the field or the submitter left it empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarFields {
    pub name: Option<String>,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub department: Option<String>,
    pub position: Option<String>,
    pub work_years: Option<i64>,
    pub work_months: Option<i64>,
    pub daily_work_hours: Option<i64>,
    pub physical_burden: Option<String>,
    /// Derived: any reported symptom or pain area.
    pub has_symptoms: bool,
}

/// A persisted survey submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyRecord {
    pub id: SubmissionId,
    pub form_type: FormType,
    pub submitter_id: Option<ActorId>,
    #[serde(flatten)]
    pub scalars: ScalarFields,
    /// Checkbox groups normalized to arrays.
    pub selections: BTreeMap<String, Vec<String>>,
    /// Verbatim copy of every submitted field.
    pub responses: Map<String, JsonValue>,
    pub status: SurveyStatus,
    pub submission_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SurveyRecord {
    pub fn is_deleted(&self) -> bool {
        self.status == SurveyStatus::Deleted
    }

    /// Rebuild the payload exactly as it was submitted.
    pub fn reconstruct(&self) -> Map<String, JsonValue> {
        crate::normalizer::reconstruct(self.form_type, &self.responses)
    }
}
