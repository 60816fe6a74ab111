//! Types for the cycle scheduler.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::request::RequestStoreError;
use crate::session::SessionError;

/// Errors that abort a cycle or a scheduler operation.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("request store error: {0}")]
    Store(#[from] RequestStoreError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Timer,
    Webhook,
    Manual,
    Startup,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Timer => "timer",
            TriggerSource::Webhook => "webhook",
            TriggerSource::Manual => "manual",
            TriggerSource::Startup => "startup",
        }
    }
}

/// Acknowledgement returned by `Scheduler::trigger`.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerAck {
    pub source: TriggerSource,
    /// False when the scheduler is not running; nothing was queued.
    pub accepted: bool,
    /// A cycle is running; the trigger becomes (or joins) the follow-up cycle.
    pub coalesced: bool,
}

/// Why a cycle did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyRunning,
    /// Credentials are still unusable.
    AuthPaused { detail: String },
}

/// Result of `Scheduler::run_cycle`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed(CycleReport),
    Skipped(SkipReason),
}

/// Summary of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub trigger: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Requests seen for the first time.
    pub new_requests: u32,
    pub processed: u32,
    pub completed: u32,
    pub retried: u32,
    pub failed: u32,
    /// The cycle stopped early because credentials became unusable.
    pub auth_paused: bool,
    /// Listing the request source failed; the cycle used stored state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    /// The browser session could not be acquired; the drain ended early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleReport {
    pub(crate) fn new(trigger: TriggerSource, started_at: DateTime<Utc>) -> Self {
        Self {
            trigger,
            started_at,
            finished_at: started_at,
            new_requests: 0,
            processed: 0,
            completed: 0,
            retried: 0,
            failed: 0,
            auth_paused: false,
            source_error: None,
            session_error: None,
            error: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Automation paused until a credential refresh succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthPause {
    pub since: DateTime<Utc>,
    pub reason: String,
}

/// Current status of the scheduler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub cycle_running: bool,
    pub last_trigger: Option<TriggerSource>,
    pub last_trigger_at: Option<DateTime<Utc>>,
    pub last_run_started: Option<DateTime<Utc>>,
    pub last_run_completed: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub auth_pause: Option<AuthPause>,
    pub last_report: Option<CycleReport>,
    /// Units per state type.
    pub unit_counts: BTreeMap<String, i64>,
}
