use serde::Serialize;

/// Failure reason when no candidate survives filtering.
pub const NO_MATCH: &str = "no-match";

/// Failure reason when the fetched candidate never shows the ready marker.
pub const READY_MARKER_TIMEOUT: &str = "ready-marker-timeout";

/// Result of processing one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum EngineOutcome {
    /// Fetched, or already in the library. Carries the candidate title.
    Completed { candidate: Option<String> },
    RetryableFailure(String),
    PermanentFailure(String),
    /// The credential is unusable; automation must pause.
    AuthFailure(String),
}

impl EngineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineOutcome::Completed { .. } => "completed",
            EngineOutcome::RetryableFailure(_) => "retryable",
            EngineOutcome::PermanentFailure(_) => "permanent",
            EngineOutcome::AuthFailure(_) => "auth_failure",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            EngineOutcome::Completed { .. } => None,
            EngineOutcome::RetryableFailure(reason)
            | EngineOutcome::PermanentFailure(reason)
            | EngineOutcome::AuthFailure(reason) => Some(reason),
        }
    }
}
