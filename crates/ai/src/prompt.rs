//! Prompt templates.
//!
//! Rows are sent without personal identifiers (name, submitter).

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use safework_survey::{FormType, SurveyRecord};

use crate::completion::{ChatMessage, CompletionRequest};
use crate::error::AiError;

const SAFETY_ANALYST: &str = "You are an occupational safety and health analyst. \
You review workplace health survey data and write concise, factual findings for \
safety managers. Do not invent data that is not present in the input.";

const REPORT_INSTRUCTIONS: &str = "Write a report in Markdown with these sections: \
Summary, Key Risk Factors, Affected Departments, Recommendations. \
Base every statement on the survey rows below.";

/// Kind of structured analysis requested from the collaborator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Risk,
    Trends,
    Anomalies,
    Insights,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 4] = [
        AnalysisType::Risk,
        AnalysisType::Trends,
        AnalysisType::Anomalies,
        AnalysisType::Insights,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Risk => "risk",
            AnalysisType::Trends => "trends",
            AnalysisType::Anomalies => "anomalies",
            AnalysisType::Insights => "insights",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        AnalysisType::ALL.into_iter().find(|t| t.as_str() == s)
    }

    fn instructions(&self) -> &'static str {
        match self {
            AnalysisType::Risk => {
                "Assess musculoskeletal and stress risk. Respond with JSON: \
                 {\"risk_level\": \"low|medium|high\", \"high_risk_ids\": [..], \"factors\": [..]}"
            }
            AnalysisType::Trends => {
                "Identify trends across submission dates and departments. Respond with JSON: \
                 {\"trends\": [{\"description\": .., \"direction\": \"up|down|flat\"}]}"
            }
            AnalysisType::Anomalies => {
                "Find submissions that deviate strongly from the rest. Respond with JSON: \
                 {\"anomalies\": [{\"id\": .., \"reason\": ..}]}"
            }
            AnalysisType::Insights => {
                "Summarise actionable insights for the safety manager. Respond with JSON: \
                 {\"insights\": [..], \"priority_actions\": [..]}"
            }
        }
    }
}

impl core::fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrative report over the most recent rows of one form type (or all).
pub fn report_request(form_type: Option<FormType>, records: &[SurveyRecord]) -> Result<CompletionRequest, AiError> {
    let scope = match form_type {
        Some(f) => format!("form {} ({})", f.code(), f.title()),
        None => "all forms".to_string(),
    };
    let user = format!(
        "{REPORT_INSTRUCTIONS}\n\nScope: {scope}\nRows: {}\n\n{}",
        records.len(),
        rows_json(records)?
    );
    Ok(CompletionRequest::new(vec![ChatMessage::system(SAFETY_ANALYST), ChatMessage::user(user)])
        .with_temperature(0.2))
}

/// Structured analysis over selected rows. The reply is expected to be JSON.
pub fn analysis_request(
    analysis_type: AnalysisType,
    form_type: FormType,
    records: &[SurveyRecord],
) -> Result<CompletionRequest, AiError> {
    let user = format!(
        "{}\n\nForm: {} ({})\nRows: {}\n\n{}",
        analysis_type.instructions(),
        form_type.code(),
        form_type.title(),
        records.len(),
        rows_json(records)?
    );
    Ok(CompletionRequest::new(vec![ChatMessage::system(SAFETY_ANALYST), ChatMessage::user(user)])
        .with_temperature(0.1))
}

fn rows_json(records: &[SurveyRecord]) -> Result<String, AiError> {
    let rows: Vec<JsonValue> = records.iter().map(row).collect();
    serde_json::to_string(&rows).map_err(|e| AiError::InvalidResponse(e.to_string()))
}

fn row(record: &SurveyRecord) -> JsonValue {
    let s = &record.scalars;
    json!({
        "id": record.id,
        "form_type": record.form_type,
        "age": s.age,
        "gender": s.gender,
        "department": s.department,
        "position": s.position,
        "work_years": s.work_years,
        "daily_work_hours": s.daily_work_hours,
        "physical_burden": s.physical_burden,
        "has_symptoms": s.has_symptoms,
        "selections": record.selections,
        "submission_date": record.submission_date.to_rfc3339(),
    })
}
