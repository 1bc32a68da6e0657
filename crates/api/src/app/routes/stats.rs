use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde_json::json;

use safework_infra::render_exposition;

use crate::app::errors;
use crate::app::services::AppServices;

pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub async fn summary(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.stats.summary().await {
        Ok(summary) => Json(json!({ "success": true, "data": summary })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "statistics query failed");
            errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "stats_unavailable", "statistics unavailable")
        }
    }
}

/// Always 200: a failed aggregate query degrades to `safework_up 0`.
pub async fn metrics(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let summary = services.stats.summary().await;
    if let Err(e) = &summary {
        tracing::warn!(error = %e, "metrics scrape without survey aggregates");
    }
    let body = render_exposition(summary.as_ref(), &services.metrics.snapshot());
    ([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], body).into_response()
}
