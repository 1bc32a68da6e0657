use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use serde_json::json;

use safework_infra::cache::KvStore;
use safework_infra::jobs::MessageQueue;
use safework_infra::storage::ObjectStore;

use crate::app::services::AppServices;

/// Liveness plus dependency checks. Only the relational store is fatal;
/// cache, object storage and queue failures report `degraded`.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let database = services.database.ping().await;
    let cache = services.cache.ping().await.is_ok();
    let storage = services.storage.ping().await.is_ok();
    let queue = services.queue.ping().await.is_ok();

    if let Err(e) = &database {
        tracing::error!(error = %e, "health check: database unreachable");
    }
    let (status, label) = match (&database, cache && storage && queue) {
        (Err(_), _) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
        (Ok(()), false) => (StatusCode::OK, "degraded"),
        (Ok(()), true) => (StatusCode::OK, "healthy"),
    };

    (
        status,
        Json(json!({
            "status": label,
            "timestamp": services.clock.now(),
            "checks": {
                "database": database.is_ok(),
                "cache": cache,
                "storage": storage,
                "queue": queue,
            },
        })),
    )
        .into_response()
}
