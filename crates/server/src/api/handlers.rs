use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use seerrbridge_core::{
    CredentialStatus, LibraryStats, SanitizedConfig, SchedulerStatus, SessionStatus,
};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// Combined view of the scheduler, browser session and credential.
#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_secs: u64,
    pub scheduler: SchedulerStatus,
    pub session: SessionStatus,
    pub credential: CredentialStatus,
    /// Last successful library stats refresh, if any.
    pub library_stats: Option<LibraryStats>,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: state.version().to_string(),
        uptime_secs: state.uptime_secs(),
        scheduler: state.scheduler().status(),
        session: state.sessions().status(),
        credential: state.credentials().status().await,
        library_stats: state.sessions().library_stats(),
    })
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
