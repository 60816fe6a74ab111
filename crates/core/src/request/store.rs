//! Request storage trait and types.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::recovery::RetryPolicy;
use crate::request::{
    EligibleCursor, EligibleUnit, MediaKind, MediaRequest, ObservedRequest, UnitOutcome, UnitState,
    UpsertOutcome, WorkUnit,
};

/// Error type for request store operations.
#[derive(Debug)]
pub enum RequestStoreError {
    /// Request (or the given unit of it) not found.
    NotFound(String),
    /// Cannot perform operation due to current state.
    InvalidState {
        unit: String,
        current_state: String,
        operation: String,
    },
    /// Database error.
    Database(String),
}

impl fmt::Display for RequestStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStoreError::NotFound(id) => write!(f, "Request not found: {}", id),
            RequestStoreError::InvalidState {
                unit,
                current_state,
                operation,
            } => write!(
                f,
                "Cannot {} {}: current state is {}",
                operation, unit, current_state
            ),
            RequestStoreError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for RequestStoreError {}

impl From<rusqlite::Error> for RequestStoreError {
    fn from(e: rusqlite::Error) -> Self {
        RequestStoreError::Database(e.to_string())
    }
}

/// Filter for querying requests.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    /// Only requests with at least one unit in this state type.
    pub state: Option<String>,
    pub kind: Option<MediaKind>,
    pub limit: i64,
    pub offset: i64,
}

impl RequestFilter {
    pub fn new() -> Self {
        Self {
            state: None,
            kind: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// A unit state transition applied by the store.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: UnitState,
    pub to: UnitState,
    pub attempts: u32,
}

/// Trait for request storage.
pub trait RequestStore: Send + Sync {
    /// Merge an observed request. Known units are never modified.
    fn upsert_observed(&self, request: &ObservedRequest) -> Result<UpsertOutcome, RequestStoreError>;

    /// Get a request with all its units.
    fn get(&self, id: &str) -> Result<Option<MediaRequest>, RequestStoreError>;

    /// List requests (oldest first) matching the filter.
    fn list(&self, filter: &RequestFilter) -> Result<Vec<MediaRequest>, RequestStoreError>;

    /// Count requests matching the filter (ignores limit/offset).
    fn count(&self, filter: &RequestFilter) -> Result<i64, RequestStoreError>;

    /// Count units per state type.
    fn count_units_by_state(&self) -> Result<Vec<(String, i64)>, RequestStoreError>;

    /// The first eligible unit strictly after `after`, in first-seen order.
    fn next_eligible(
        &self,
        now: DateTime<Utc>,
        after: Option<&EligibleCursor>,
    ) -> Result<Option<EligibleUnit>, RequestStoreError>;

    /// Eligible units of one request, in season order.
    fn eligible_units_for(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkUnit>, RequestStoreError>;

    /// Move an eligible unit to `InProgress`.
    fn begin_attempt(
        &self,
        request_id: &str,
        season: Option<u32>,
    ) -> Result<Transition, RequestStoreError>;

    /// Apply the outcome of an attempt on an `InProgress` unit.
    fn record_outcome(
        &self,
        request_id: &str,
        season: Option<u32>,
        outcome: &UnitOutcome,
        policy: &RetryPolicy,
    ) -> Result<Transition, RequestStoreError>;

    /// Move `RetryPending` units whose delay has elapsed back to `Pending`.
    fn promote_due_retries(&self, now: DateTime<Utc>) -> Result<usize, RequestStoreError>;

    /// Manually reset a unit (or all units when `season` is `None` on a show) to `Pending`.
    fn resubmit(
        &self,
        request_id: &str,
        season: Option<u32>,
    ) -> Result<Vec<Transition>, RequestStoreError>;

    /// Return units left `InProgress` by an interrupted run to `Pending`.
    fn reset_in_progress(&self) -> Result<usize, RequestStoreError>;
}

/// Lazy drain over the eligible units of a store.
///
/// Each call to [`EligibleUnits::next_unit`] queries the store, so state changes
/// made while draining are observed; the cursor keeps one drain from revisiting
/// a unit. Call [`EligibleUnits::restart`] to begin again from the oldest unit.
pub struct EligibleUnits<'a> {
    store: &'a dyn RequestStore,
    now: DateTime<Utc>,
    cursor: Option<EligibleCursor>,
}

impl<'a> EligibleUnits<'a> {
    pub fn new(store: &'a dyn RequestStore, now: DateTime<Utc>) -> Self {
        Self {
            store,
            now,
            cursor: None,
        }
    }

    pub fn next_unit(&mut self) -> Result<Option<WorkUnit>, RequestStoreError> {
        match self.store.next_eligible(self.now, self.cursor.as_ref())? {
            Some(eligible) => {
                self.cursor = Some(eligible.cursor);
                Ok(Some(eligible.unit))
            }
            None => Ok(None),
        }
    }

    pub fn restart(&mut self, now: DateTime<Utc>) {
        self.now = now;
        self.cursor = None;
    }
}
