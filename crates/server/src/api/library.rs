use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use seerrbridge_core::{LibraryStats, LibraryStatsError};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct LibraryRefreshResponse {
    pub refreshed: bool,
    /// Fresh stats on success, the last known ones otherwise.
    pub library_stats: Option<LibraryStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Re-read the library stats through the browser session.
///
/// Waits behind any cycle holding the session. 503 when the session cannot
/// be had, 502 when the library page did not yield stats.
pub async fn refresh_library_stats(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<LibraryRefreshResponse>) {
    info!("Library stats refresh requested");
    match state.sessions().refresh_library_stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(LibraryRefreshResponse {
                refreshed: true,
                library_stats: Some(stats),
                error: None,
            }),
        ),
        Err(e) => {
            let status = match e {
                LibraryStatsError::Session(_) => StatusCode::SERVICE_UNAVAILABLE,
                LibraryStatsError::Surface(_) => StatusCode::BAD_GATEWAY,
            };
            (
                status,
                Json(LibraryRefreshResponse {
                    refreshed: false,
                    library_stats: state.sessions().library_stats(),
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}
