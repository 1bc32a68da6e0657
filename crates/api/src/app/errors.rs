use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use safework_infra::surveys::SubmissionError;

pub fn submission_error_to_response(err: SubmissionError) -> axum::response::Response {
    match err {
        SubmissionError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        SubmissionError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("submission {id} not found"))
        }
        SubmissionError::Persistence(e) => {
            tracing::error!(error = %e, "persistence failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "persistence_error", "failed to store submission")
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "success": false,
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
