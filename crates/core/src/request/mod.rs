//! Request store: known media requests and per-unit processing state.
//!
//! A movie is one unit; a show is one unit per requested season. Each unit
//! moves through `pending -> in_progress -> {completed, retry_pending, failed}`,
//! with `retry_pending` returning to `pending` once its backoff has elapsed.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteRequestStore;
pub use store::{
    EligibleUnits, RequestFilter, RequestStore, RequestStoreError, Transition,
};
pub use types::{
    EligibleCursor, EligibleUnit, MediaIds, MediaKind, MediaRequest, ObservedRequest,
    RequestUnit, UnitOutcome, UnitState, UpsertOutcome, WorkUnit, UNIT_STATE_TYPES,
};
