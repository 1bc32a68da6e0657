use axum::{
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};

use safework_core::ActorId;
use safework_infra::surveys::RequestMeta;

use crate::app::errors::json_error;
use crate::context::{ActorContext, RequestContext};

pub const AUTHENTICATED_USER_HEADER: &str = "x-authenticated-user";

/// Attach `ActorContext` and `RequestContext` to every request.
pub async fn actor_middleware(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let actor = extract_actor(req.headers());
    let meta = request_meta(req.headers());
    req.extensions_mut().insert(actor);
    req.extensions_mut().insert(RequestContext::new(meta));
    next.run(req).await
}

/// Reject anonymous callers with 401.
pub async fn require_authenticated(req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let authenticated = req
        .extensions()
        .get::<ActorContext>()
        .is_some_and(|a| !a.is_anonymous());
    if !authenticated {
        return json_error(StatusCode::UNAUTHORIZED, "unauthorized", "authentication required");
    }
    next.run(req).await
}

fn extract_actor(headers: &HeaderMap) -> ActorContext {
    headers
        .get(AUTHENTICATED_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| ActorContext::new(ActorId::new(v)))
        .unwrap_or_else(ActorContext::anonymous)
}

fn header_string(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn request_meta(headers: &HeaderMap) -> RequestMeta {
    RequestMeta {
        user_agent: header_string(headers, header::USER_AGENT),
        remote_addr: header_string(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string())),
        content_type: header_string(headers, header::CONTENT_TYPE),
    }
}
