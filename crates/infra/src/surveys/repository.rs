//! Canonical survey rows, through the Data Access Layer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use tracing::instrument;

use safework_core::{ActorId, SubmissionId};
use safework_survey::{FormType, NormalizedSubmission, ScalarFields, SurveyRecord, SurveyStatus};

use crate::db::{Database, DbError, Row, SqlValue, parse_timestamp};

const TABLE: &str = "surveys";

const COLUMNS: &str = "id, form_type, submitter_id, name, age, gender, department, position, \
work_years, work_months, daily_work_hours, physical_burden, has_symptoms, selections, responses, \
status, submission_date, created_at, updated_at";

/// Row selection for listing and job handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurveyFilter {
    pub form_type: Option<FormType>,
    pub include_deleted: bool,
    /// Inclusive lower bound on `submission_date`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `submission_date`.
    pub until: Option<DateTime<Utc>>,
    /// Restrict to these ids (empty = no restriction).
    pub ids: Vec<SubmissionId>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Ascending by id instead of newest first.
    pub oldest_first: bool,
}

impl SurveyFilter {
    pub fn for_form(form_type: FormType) -> Self {
        Self {
            form_type: Some(form_type),
            ..Default::default()
        }
    }

    fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if !self.include_deleted {
            clauses.push("status = ?".to_string());
            params.push(SurveyStatus::Submitted.as_str().into());
        }
        if let Some(form_type) = self.form_type {
            clauses.push("form_type = ?".to_string());
            params.push(form_type.code().into());
        }
        if let Some(since) = self.since {
            clauses.push("submission_date >= ?".to_string());
            params.push(SqlValue::timestamp(since));
        }
        if let Some(until) = self.until {
            clauses.push("submission_date < ?".to_string());
            params.push(SqlValue::timestamp(until));
        }
        if !self.ids.is_empty() {
            clauses.push(format!("id IN ({})", vec!["?"; self.ids.len()].join(", ")));
            params.extend(self.ids.iter().map(|id| SqlValue::Integer(id.get())));
        }

        if clauses.is_empty() {
            ("1 = 1".to_string(), params)
        } else {
            (clauses.join(" AND "), params)
        }
    }
}

#[derive(Debug, Clone)]
pub struct SurveyRepository {
    db: Database,
}

impl SurveyRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert a normalized submission; returns the stored record.
    #[instrument(skip(self, submission, submitter), fields(form_type = %submission.form_type), err)]
    pub async fn insert(
        &self,
        submission: &NormalizedSubmission,
        submitter: Option<&ActorId>,
        at: DateTime<Utc>,
    ) -> Result<SurveyRecord, DbError> {
        let mut fields = vec![
            ("form_type", submission.form_type.code().into()),
            ("submitter_id", submitter.map(|a| a.as_str()).into()),
            ("status", SurveyStatus::Submitted.as_str().into()),
            ("submission_date", SqlValue::timestamp(at)),
            ("created_at", SqlValue::timestamp(at)),
            ("updated_at", SqlValue::timestamp(at)),
        ];
        fields.extend(content_fields(submission)?);

        let id = SubmissionId::new(self.db.insert(TABLE, &fields).await?);
        Ok(SurveyRecord {
            id,
            form_type: submission.form_type,
            submitter_id: submitter.cloned(),
            scalars: submission.scalars.clone(),
            selections: submission.selections.clone(),
            responses: submission.responses.clone(),
            status: SurveyStatus::Submitted,
            submission_date: at,
            created_at: at,
            updated_at: at,
        })
    }

    /// Direct lookup; deleted records are returned too.
    #[instrument(skip(self), fields(submission_id = %id), err)]
    pub async fn get(&self, id: SubmissionId) -> Result<Option<SurveyRecord>, DbError> {
        let sql = format!("SELECT {COLUMNS} FROM {TABLE} WHERE id = ?");
        self.db
            .query_first(&sql, &[SqlValue::Integer(id.get())])
            .await?
            .as_ref()
            .map(record_from_row)
            .transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn list(&self, filter: &SurveyFilter) -> Result<Vec<SurveyRecord>, DbError> {
        let (where_clause, mut params) = filter.where_clause();
        let order = if filter.oldest_first {
            "id ASC"
        } else {
            "submission_date DESC, id DESC"
        };
        let mut sql = format!("SELECT {COLUMNS} FROM {TABLE} WHERE {where_clause} ORDER BY {order}");
        if filter.limit.is_some() || filter.offset.is_some() {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(filter.limit.map(i64::from).unwrap_or(-1).into());
            params.push(i64::from(filter.offset.unwrap_or(0)).into());
        }

        self.db
            .query(&sql, &params)
            .await?
            .iter()
            .map(record_from_row)
            .collect()
    }

    /// Number of rows matching `filter`, ignoring `limit`/`offset`.
    pub async fn count(&self, filter: &SurveyFilter) -> Result<i64, DbError> {
        let (where_clause, params) = filter.where_clause();
        self.db.count(TABLE, Some(&where_clause), &params).await
    }

    /// Rewrite scalar columns, selections and responses. `form_type` is left untouched.
    #[instrument(skip(self, submission), fields(submission_id = %id), err)]
    pub async fn update_content(
        &self,
        id: SubmissionId,
        submission: &NormalizedSubmission,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut fields = content_fields(submission)?;
        fields.push(("updated_at", SqlValue::timestamp(at)));
        self.db
            .update(TABLE, &fields, "id = ?", &[SqlValue::Integer(id.get())])
            .await
    }

    #[instrument(skip(self), fields(submission_id = %id), err)]
    pub async fn soft_delete(&self, id: SubmissionId, at: DateTime<Utc>) -> Result<bool, DbError> {
        self.db
            .update(
                TABLE,
                &[
                    ("status", SurveyStatus::Deleted.as_str().into()),
                    ("updated_at", SqlValue::timestamp(at)),
                ],
                "id = ?",
                &[SqlValue::Integer(id.get())],
            )
            .await
    }
}

fn content_fields(submission: &NormalizedSubmission) -> Result<Vec<(&'static str, SqlValue)>, DbError> {
    let s = &submission.scalars;
    let selections =
        serde_json::to_string(&submission.selections).map_err(|e| DbError::Decode(e.to_string()))?;
    let responses =
        serde_json::to_string(&submission.responses).map_err(|e| DbError::Decode(e.to_string()))?;
    Ok(vec![
        ("name", s.name.clone().into()),
        ("age", s.age.into()),
        ("gender", s.gender.clone().into()),
        ("department", s.department.clone().into()),
        ("position", s.position.clone().into()),
        ("work_years", s.work_years.into()),
        ("work_months", s.work_months.into()),
        ("daily_work_hours", s.daily_work_hours.into()),
        ("physical_burden", s.physical_burden.clone().into()),
        ("has_symptoms", s.has_symptoms.into()),
        ("selections", selections.into()),
        ("responses", responses.into()),
    ])
}

fn text(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(JsonValue::as_str).map(str::to_string)
}

fn int(row: &Row, column: &str) -> Option<i64> {
    row.get(column).and_then(JsonValue::as_i64)
}

fn required_text(row: &Row, column: &str) -> Result<String, DbError> {
    text(row, column).ok_or_else(|| DbError::Decode(format!("column {column} is missing")))
}

fn record_from_row(row: &Row) -> Result<SurveyRecord, DbError> {
    let id = int(row, "id").ok_or_else(|| DbError::Decode("column id is missing".to_string()))?;
    let form_type = FormType::parse(&required_text(row, "form_type")?)
        .map_err(|e| DbError::Decode(e.to_string()))?;
    let status = SurveyStatus::parse(&required_text(row, "status")?).map_err(|e| DbError::Decode(e.to_string()))?;

    let selections: BTreeMap<String, Vec<String>> = match text(row, "selections") {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| DbError::Decode(format!("selections: {e}")))?,
        None => BTreeMap::new(),
    };
    let responses: Map<String, JsonValue> = serde_json::from_str(&required_text(row, "responses")?)
        .map_err(|e| DbError::Decode(format!("responses: {e}")))?;

    Ok(SurveyRecord {
        id: SubmissionId::new(id),
        form_type,
        submitter_id: text(row, "submitter_id").map(ActorId::new),
        scalars: ScalarFields {
            name: text(row, "name"),
            age: int(row, "age"),
            gender: text(row, "gender"),
            department: text(row, "department"),
            position: text(row, "position"),
            work_years: int(row, "work_years"),
            work_months: int(row, "work_months"),
            daily_work_hours: int(row, "daily_work_hours"),
            physical_burden: text(row, "physical_burden"),
            has_symptoms: int(row, "has_symptoms").unwrap_or(0) != 0,
        },
        selections,
        responses,
        status,
        submission_date: parse_timestamp(&required_text(row, "submission_date")?)?,
        created_at: parse_timestamp(&required_text(row, "created_at")?)?,
        updated_at: parse_timestamp(&required_text(row, "updated_at")?)?,
    })
}
