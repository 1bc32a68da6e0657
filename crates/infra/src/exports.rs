//! Artifact rendering and naming shared by the export job and the synchronous CSV download.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use safework_survey::{FormType, SurveyRecord};

pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const MARKDOWN_CONTENT_TYPE: &str = "text/markdown; charset=utf-8";

/// UTF-8 byte order mark; spreadsheet tools need it to read Hangul correctly.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const CSV_HEADER: [&str; 17] = [
    "id",
    "form_type",
    "submitter_id",
    "name",
    "age",
    "gender",
    "department",
    "position",
    "work_years",
    "work_months",
    "daily_work_hours",
    "physical_burden",
    "has_symptoms",
    "status",
    "submission_date",
    "selections",
    "responses",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => CSV_CONTENT_TYPE,
            ExportFormat::Json => JSON_CONTENT_TYPE,
        }
    }
}

/// Cache entry mapping a public filename to an artifact key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadPointer {
    pub key: String,
    pub filename: String,
    pub content_type: String,
    pub expires_at: DateTime<Utc>,
}

/// Path segment for a form scope: the form code, or `all`.
pub fn scope(form_type: Option<FormType>) -> &'static str {
    form_type.map(|f| f.code()).unwrap_or("all")
}

/// `YYYYMMDDTHHMMSSZ`.
pub fn artifact_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// `exports/{scope}/{stamp}.{ext}`
pub fn export_key(form_type: Option<FormType>, format: ExportFormat, at: DateTime<Utc>) -> String {
    format!("exports/{}/{}.{}", scope(form_type), artifact_stamp(at), format.extension())
}

/// `reports/{scope}/{stamp}.md`
pub fn report_key(form_type: Option<FormType>, at: DateTime<Utc>) -> String {
    format!("reports/{}/{}.md", scope(form_type), artifact_stamp(at))
}

/// Date-stamped download name, e.g. `safework_001_2026-03-01.csv`.
pub fn csv_filename(form_type: Option<FormType>, date: NaiveDate) -> String {
    format!("safework_{}_{}.csv", scope(form_type), date.format("%Y-%m-%d"))
}

pub fn render_csv(records: &[SurveyRecord]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(UTF8_BOM.to_vec());
    writer.write_record(CSV_HEADER)?;

    for r in records {
        let s = &r.scalars;
        let opt_int = |v: Option<i64>| v.map(|n| n.to_string()).unwrap_or_default();
        let selections = serde_json::to_string(&r.selections).unwrap_or_default();
        let responses = serde_json::to_string(&r.responses).unwrap_or_default();
        writer.write_record([
            r.id.to_string(),
            r.form_type.code().to_string(),
            r.submitter_id.as_ref().map(|a| a.to_string()).unwrap_or_default(),
            s.name.clone().unwrap_or_default(),
            opt_int(s.age),
            s.gender.clone().unwrap_or_default(),
            s.department.clone().unwrap_or_default(),
            s.position.clone().unwrap_or_default(),
            opt_int(s.work_years),
            opt_int(s.work_months),
            opt_int(s.daily_work_hours),
            s.physical_burden.clone().unwrap_or_default(),
            if s.has_symptoms { "1" } else { "0" }.to_string(),
            r.status.as_str().to_string(),
            r.submission_date.to_rfc3339(),
            selections,
            responses,
        ])?;
    }

    writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

pub fn render_json(records: &[SurveyRecord], generated_at: DateTime<Utc>) -> Result<Vec<u8>, serde_json::Error> {
    let doc: JsonValue = json!({
        "generated_at": generated_at,
        "count": records.len(),
        "records": records,
    });
    serde_json::to_vec_pretty(&doc)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;
    use serde_json::Map;

    use safework_core::SubmissionId;
    use safework_survey::{ScalarFields, SurveyStatus};

    use super::*;

    fn record() -> SurveyRecord {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut responses = Map::new();
        responses.insert("name".into(), "홍길동".into());
        SurveyRecord {
            id: SubmissionId::new(3),
            form_type: FormType::MusculoskeletalSymptom,
            submitter_id: None,
            scalars: ScalarFields {
                name: Some("홍길동".into()),
                age: Some(35),
                department: Some("조립, 1팀".into()),
                ..Default::default()
            },
            selections: BTreeMap::new(),
            responses,
            status: SurveyStatus::Submitted,
            submission_date: at,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn csv_has_bom_header_and_quoted_fields() {
        let bytes = render_csv(&[record()]).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("id,form_type,submitter_id,name,age"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("3,001,,홍길동,35,"));
        assert!(row.contains("\"조립, 1팀\""));
    }

    #[test]
    fn names_and_keys_are_deterministic() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 5, 7).unwrap();
        assert_eq!(
            export_key(Some(FormType::HazardAssessment), ExportFormat::Json, at),
            "exports/002/20260301T090507Z.json"
        );
        assert_eq!(report_key(None, at), "reports/all/20260301T090507Z.md");
        assert_eq!(
            csv_filename(Some(FormType::MusculoskeletalSymptom), at.date_naive()),
            "safework_001_2026-03-01.csv"
        );
    }

    #[test]
    fn json_export_wraps_records() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let doc: JsonValue = serde_json::from_slice(&render_json(&[record()], at).unwrap()).unwrap();
        assert_eq!(doc["count"], 1);
        assert_eq!(doc["records"][0]["age"], 35);
    }
}
