//! Request source abstraction.
//!
//! The source lists approved requests and is told when a request has been
//! fully delivered. Overseerr (and API-compatible forks) is the only
//! implementation.

mod overseerr;

pub use overseerr::OverseerrClient;

use async_trait::async_trait;
use thiserror::Error;

use crate::request::{MediaRequest, ObservedRequest};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request source not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("request {0} has no source media id")]
    MissingMediaId(String),
}

/// Lists approved requests and reports completions back.
#[async_trait]
pub trait RequestSource: Send + Sync {
    fn name(&self) -> &str;

    /// Approved requests that are not yet available, oldest first.
    async fn approved_requests(&self) -> Result<Vec<ObservedRequest>, SourceError>;

    /// Tell the source the request has been delivered.
    async fn mark_available(&self, request: &MediaRequest) -> Result<(), SourceError>;
}
