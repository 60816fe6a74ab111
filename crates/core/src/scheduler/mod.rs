//! Cycle scheduler.
//!
//! One worker runs cycles, woken by the poll timer or by explicit triggers.
//! Triggers arriving while a cycle runs coalesce into a single follow-up
//! cycle. A cycle ingests approved requests, promotes due retries and then
//! drains eligible units oldest first, one unit at a time.

mod runner;
mod types;

pub use runner::Scheduler;
pub use types::{
    AuthPause, CycleOutcome, CycleReport, SchedulerError, SchedulerStatus, SkipReason,
    TriggerAck, TriggerSource,
};
