use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::surface::SurfaceError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("timed out after {0:?} waiting for the browser session")]
    AcquireTimeout(Duration),

    #[error("failed to start browser session: {0}")]
    Launch(#[source] SurfaceError),

    #[error("browser session is not running")]
    Closed,
}

impl SessionError {
    /// Short cause label for metrics.
    pub fn cause(&self) -> &'static str {
        match self {
            SessionError::AcquireTimeout(_) => "timeout",
            SessionError::Launch(_) => "launch",
            SessionError::Closed => "closed",
        }
    }
}

/// Why a library stats refresh produced nothing.
#[derive(Debug, Error)]
pub enum LibraryStatsError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("failed to read library stats: {0}")]
    Surface(#[from] SurfaceError),
}

/// Coarse session state for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No surface launched yet (or shut down).
    Absent,
    Idle,
    Busy,
    /// Flagged for recreation on the next acquire.
    Unhealthy,
}

/// Snapshot of the session, readable without waiting for the session lock.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub healthy: bool,
    pub launches: u64,
    /// Launches after the first one.
    pub restart_count: u64,
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_unhealthy_reason: Option<String>,
}
