use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::rest;
use crate::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(rest::health))
        // Poll trigger, hit by an external cron agent
        .route(
            "/api/cron/markets",
            get(rest::api_cron_markets).post(rest::api_cron_markets),
        )
        // Front-end passthrough for lifecycle events
        .route("/api/events", post(rest::api_publish_event))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // Method + path only; the cron bearer never reaches the logs.
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}
