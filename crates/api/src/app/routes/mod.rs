use axum::{Router, routing::get};

pub mod downloads;
pub mod jobs;
pub mod stats;
pub mod surveys;
pub mod system;

/// Router for every `/api` endpoint.
pub fn router() -> Router {
    Router::new()
        .nest("/surveys", surveys::router())
        .route("/stats", get(stats::summary))
        .route("/downloads/:filename", get(downloads::download))
        .nest("/admin", jobs::router())
}
