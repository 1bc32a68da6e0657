use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{StatusCode, header},
    response::IntoResponse,
};

use safework_infra::cache::{get_json, keys};
use safework_infra::exports::DownloadPointer;
use safework_infra::storage::ObjectStore;

use crate::app::errors;
use crate::app::services::AppServices;

/// Serve a generated artifact through its short-lived download pointer.
pub async fn download(
    Extension(services): Extension<Arc<AppServices>>,
    Path(filename): Path<String>,
) -> axum::response::Response {
    let pointer = match get_json::<DownloadPointer>(services.cache.as_ref(), &keys::download(&filename)).await {
        Ok(Some(p)) if p.expires_at > services.clock.now() => p,
        Ok(_) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "download link expired or unknown"),
        Err(e) => {
            tracing::warn!(error = %e, filename = %filename, "download pointer lookup failed");
            return errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "cache_unavailable", "download lookup failed");
        }
    };

    match services.storage.get(&pointer.key).await {
        Ok(Some(object)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, object.info.content_type),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", pointer.filename),
                ),
            ],
            object.body,
        )
            .into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "artifact no longer available"),
        Err(e) => {
            tracing::error!(error = %e, key = %pointer.key, "artifact read failed");
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", "artifact read failed")
        }
    }
}
