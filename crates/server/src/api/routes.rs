use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{
    audit, cycle, evidence, handlers, library, middleware::metrics_middleware, requests, webhook,
};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health, config and status
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(handlers::get_status))
        // Triggers
        .route("/webhook", post(webhook::receive_webhook))
        .route("/cycle", post(cycle::trigger_cycle))
        .route("/library/refresh", post(library::refresh_library_stats))
        // Requests
        .route("/requests", get(requests::list_requests))
        .route("/requests/{id}", get(requests::get_request))
        .route("/requests/{id}/resubmit", post(requests::resubmit_request))
        // Failure snapshots and audit trail
        .route("/evidence", get(evidence::list_evidence))
        .route("/audit", get(audit::query_audit));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
