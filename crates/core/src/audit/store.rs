use chrono::{DateTime, Utc};
use thiserror::Error;

use super::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit database error: {0}")]
    Database(String),

    #[error("audit record could not be encoded: {0}")]
    Encoding(String),
}

impl From<rusqlite::Error> for AuditError {
    fn from(e: rusqlite::Error) -> Self {
        AuditError::Database(e.to_string())
    }
}

/// Selects audit records. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditQuery {
    pub request_id: Option<String>,
    /// Season of a show request. Ignored without `request_id`.
    pub season: Option<u32>,
    /// State a unit landed in, e.g. `failed` or `retry_pending`.
    pub outcome: Option<String>,
    pub event_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditQuery {
    pub fn all() -> Self {
        Self::default()
    }

    /// Everything recorded about one request, across its seasons.
    pub fn for_request(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            ..Self::default()
        }
    }

    /// History of one unit. A movie's unit is its request.
    pub fn for_unit(request_id: impl Into<String>, season: Option<u32>) -> Self {
        Self {
            season,
            ..Self::for_request(request_id)
        }
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }
}

/// A window over query results, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 100;

    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    pub fn first(limit: i64) -> Self {
        Self::new(limit, 0)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first(Self::DEFAULT_LIMIT)
    }
}

/// Persistent audit trail.
pub trait AuditStore: Send + Sync {
    /// Append records in order, all or nothing.
    fn append(&self, records: &[AuditRecord]) -> Result<(), AuditError>;

    /// Matching records, newest first.
    fn history(&self, query: &AuditQuery, page: Page) -> Result<Vec<AuditRecord>, AuditError>;

    fn count(&self, query: &AuditQuery) -> Result<i64, AuditError>;
}
