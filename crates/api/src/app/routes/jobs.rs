use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use safework_infra::jobs::{JobMessage, JobType, MessageQueue};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::middleware;

const DEFAULT_DEAD_LETTER_LIMIT: usize = 50;

/// Operator endpoints; every route requires an authenticated caller.
pub fn router() -> Router {
    Router::new()
        .route("/jobs", post(enqueue_job))
        .route("/jobs/dead-letters", get(dead_letters))
        .route("/jobs/stats", get(queue_stats))
        .layer(axum::middleware::from_fn(middleware::require_authenticated))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnqueueJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(default)]
    pub priority: i32,
}

pub async fn enqueue_job(
    Extension(services): Extension<Arc<AppServices>>,
    body: axum::body::Bytes,
) -> axum::response::Response {
    let req: EnqueueJobRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_json", e.to_string()),
    };
    let Some(job_type) = JobType::parse(&req.job_type) else {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "unknown_job_type",
            format!("unknown job type: {}", req.job_type),
        );
    };

    let payload = match req.payload {
        JsonValue::Null => json!({}),
        other => other,
    };
    let message = JobMessage::new(job_type, payload, services.clock.now()).with_priority(req.priority);
    match services.queue.enqueue(message).await {
        Ok(message_id) => {
            tracing::info!(job_type = %job_type, message_id = %message_id, "job enqueued");
            (
                StatusCode::ACCEPTED,
                Json(dto::EnqueueResponse {
                    success: true,
                    message_id,
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "enqueue failed");
            errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", "job queue unavailable")
        }
    }
}

pub async fn dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::DeadLetterQuery>,
) -> axum::response::Response {
    let limit = query.limit.unwrap_or(DEFAULT_DEAD_LETTER_LIMIT);
    match services.queue.dead_letters(limit).await {
        Ok(entries) => Json(json!({ "success": true, "items": entries })).into_response(),
        Err(e) => errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", e.to_string()),
    }
}

pub async fn queue_stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.queue.depth().await {
        Ok(depth) => Json(json!({
            "success": true,
            "data": { "depth": depth, "counters": services.metrics.snapshot() },
        }))
        .into_response(),
        Err(e) => errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", e.to_string()),
    }
}
