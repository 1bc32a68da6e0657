use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use safework_core::SubmissionId;
use safework_infra::surveys::SurveyFilter;
use safework_survey::{FormType, Payload, ValidationError};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct ListSurveysQuery {
    pub form_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl ListSurveysQuery {
    pub fn to_filter(&self) -> Result<SurveyFilter, axum::response::Response> {
        Ok(SurveyFilter {
            form_type: parse_form_type(self.form_type.as_deref())?,
            include_deleted: self.include_deleted,
            limit: Some(self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)),
            offset: self.offset,
            ..Default::default()
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub form_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeadLetterQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    pub submission_id: SubmissionId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub success: bool,
    pub message_id: String,
}

// -------------------------
// Parsing helpers
// -------------------------

/// Empty or absent means "all forms".
pub fn parse_form_type(raw: Option<&str>) -> Result<Option<FormType>, axum::response::Response> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(code) => FormType::parse(code)
            .map(Some)
            .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())),
    }
}

pub fn parse_submission_id(raw: &str) -> Result<SubmissionId, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid submission id"))
}

pub fn is_form_encoded(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.trim_start().starts_with("application/x-www-form-urlencoded"))
}

/// JSON body, which must be an object.
pub fn json_payload(body: &[u8]) -> Result<Payload, axum::response::Response> {
    match serde_json::from_slice::<JsonValue>(body) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(errors::submission_error_to_response(ValidationError::NotAnObject.into())),
        Err(e) => Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            format!("malformed JSON body: {e}"),
        )),
    }
}

/// URL-encoded form body. Repeated keys (checkbox groups, with or without a
/// trailing `[]`) collect into arrays in submission order.
pub fn form_payload(body: &[u8]) -> Payload {
    let mut payload: Payload = Map::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        let key = key.strip_suffix("[]").unwrap_or(&key).to_string();
        let value = JsonValue::String(value.into_owned());
        match payload.get_mut(&key) {
            Some(JsonValue::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = JsonValue::Array(vec![first, value]);
            }
            None => {
                payload.insert(key, value);
            }
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_body_groups_repeated_keys() {
        let body = "form_type=001&name=%ED%99%8D%EA%B8%B8%EB%8F%99&age=35&pain_areas%5B%5D=neck&pain_areas%5B%5D=shoulder&gender=%EB%82%A8";
        let payload = form_payload(body.as_bytes());
        assert_eq!(payload["name"], "홍길동");
        assert_eq!(payload["age"], "35");
        assert_eq!(payload["pain_areas"], serde_json::json!(["neck", "shoulder"]));
    }

    #[test]
    fn json_body_must_be_object() {
        assert!(json_payload(br#"{"form_type":"001"}"#).is_ok());
        assert!(json_payload(b"{oops").is_err());

        let resp = json_payload(b"[1,2]").unwrap_err();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn content_type_detection() {
        assert!(is_form_encoded(Some("application/x-www-form-urlencoded; charset=UTF-8")));
        assert!(!is_form_encoded(Some("application/json")));
        assert!(!is_form_encoded(None));
    }
}
