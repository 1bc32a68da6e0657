use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;

use safework_infra::exports::{csv_filename, render_csv};
use safework_infra::surveys::SurveyFilter;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{ActorContext, RequestContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_surveys).post(submit_survey))
        .route("/export.csv", get(export_csv))
        .route("/:id", get(get_survey).put(update_survey).delete(delete_survey))
        .route("/:id/mirror", get(get_mirror))
}

fn require_admin(actor: &ActorContext) -> Result<(), axum::response::Response> {
    if actor.is_anonymous() {
        return Err(errors::json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "authentication required",
        ));
    }
    Ok(())
}

pub async fn submit_survey(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Extension(request): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let payload = if dto::is_form_encoded(content_type) {
        dto::form_payload(&body)
    } else {
        match dto::json_payload(&body) {
            Ok(p) => p,
            Err(resp) => return resp,
        }
    };

    match services.submissions.submit(&payload, actor.actor(), request.meta()).await {
        Ok(outcome) => (
            StatusCode::CREATED,
            Json(dto::SubmitResponse {
                success: true,
                submission_id: outcome.submission_id,
            }),
        )
            .into_response(),
        Err(e) => errors::submission_error_to_response(e),
    }
}

pub async fn list_surveys(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListSurveysQuery>,
) -> axum::response::Response {
    let filter = match query.to_filter() {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    match services.submissions.list(&filter).await {
        Ok((items, total)) => Json(json!({
            "success": true,
            "total": total,
            "limit": filter.limit,
            "offset": filter.offset.unwrap_or(0),
            "items": items,
        }))
        .into_response(),
        Err(e) => errors::submission_error_to_response(e),
    }
}

pub async fn get_survey(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_submission_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.submissions.get(id).await {
        Ok(record) => Json(json!({ "success": true, "data": record })).into_response(),
        Err(e) => errors::submission_error_to_response(e),
    }
}

pub async fn update_survey(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    if let Err(resp) = require_admin(&actor) {
        return resp;
    }
    let id = match dto::parse_submission_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let changes = match dto::json_payload(&body) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match services.submissions.update(id, &changes, actor.actor()).await {
        Ok(record) => Json(json!({ "success": true, "data": record })).into_response(),
        Err(e) => errors::submission_error_to_response(e),
    }
}

pub async fn delete_survey(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require_admin(&actor) {
        return resp;
    }
    let id = match dto::parse_submission_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.submissions.soft_delete(id, actor.actor()).await {
        Ok(record) => Json(json!({
            "success": true,
            "id": record.id,
            "status": record.status,
        }))
        .into_response(),
        Err(e) => errors::submission_error_to_response(e),
    }
}

/// Recovery read from the cache mirror; a miss says nothing about the row.
pub async fn get_mirror(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require_admin(&actor) {
        return resp;
    }
    let id = match dto::parse_submission_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.submissions.get_mirror(id).await {
        Ok(Some(record)) => Json(json!({ "success": true, "data": record })).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "no mirror entry"),
        Err(e) => errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "cache_unavailable", e.to_string()),
    }
}

pub async fn export_csv(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ExportQuery>,
) -> axum::response::Response {
    let form_type = match dto::parse_form_type(query.form_type.as_deref()) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let filter = SurveyFilter {
        form_type,
        oldest_first: true,
        ..Default::default()
    };
    let records = match services.submissions.repository().list(&filter).await {
        Ok(r) => r,
        Err(e) => return errors::submission_error_to_response(e.into()),
    };
    let body = match render_csv(&records) {
        Ok(b) => b,
        Err(e) => return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "export_error", e.to_string()),
    };

    let filename = csv_filename(form_type, services.clock.now().date_naive());
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    )
        .into_response()
}
