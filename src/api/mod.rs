//! HTTP surface of the broker.
//!
//! Mounts all endpoints under /v1:
//! - /v1/status: health check
//! - /v1/oauth/*: authorize redirect, code callback, token refresh
//! - /v1/users[/export]: aggregated users as JSON or a CSV download

pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/v1", routes::v1_router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
