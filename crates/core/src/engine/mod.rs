//! Search & selection engine.
//!
//! Drives one unit through the automation surface: navigate, search, filter
//! and rank the candidates, trigger the provider fetch and wait for the ready
//! marker. Every step is bounded; the caller owns the session handle.

mod processor;
mod types;

pub use processor::SelectionEngine;
pub use types::{EngineOutcome, NO_MATCH, READY_MARKER_TIMEOUT};
