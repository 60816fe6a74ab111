//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Scheduler cycles and per-unit outcomes
//! - Browser session restarts and acquire failures
//! - Credential refreshes
//! - Request source calls

use once_cell::sync::Lazy;
use prometheus::{
    Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
};

// =============================================================================
// Scheduler
// =============================================================================

/// Cycles run, by trigger and result.
pub static CYCLES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seerrbridge_cycles_total", "Total scheduler cycles"),
        &["trigger", "result"], // result: "completed", "auth_paused", "skipped"
    )
    .unwrap()
});

/// Cycle duration in seconds.
pub static CYCLE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("seerrbridge_cycle_duration_seconds", "Duration of one cycle")
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0, 1800.0]),
        &[],
    )
    .unwrap()
});

/// Unit attempts by outcome.
pub static UNIT_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seerrbridge_unit_outcomes_total", "Processing attempts by outcome"),
        &["kind", "outcome"], // outcome: "completed", "retryable", "permanent", "auth_paused"
    )
    .unwrap()
});

/// Attempt duration in seconds.
pub static ATTEMPT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "seerrbridge_attempt_duration_seconds",
            "Duration of one processing attempt",
        )
        .buckets(vec![1.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0]),
        &["outcome"],
    )
    .unwrap()
});

/// Candidates found per search.
pub static CANDIDATES_FOUND: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "seerrbridge_candidates_found",
            "Number of candidates found per search",
        )
        .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
        &[],
    )
    .unwrap()
});

/// Whether the scheduler is paused for authorization (0/1).
pub static AUTH_PAUSED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "seerrbridge_auth_paused",
        "Whether processing is paused waiting for a valid credential",
    )
    .unwrap()
});

// =============================================================================
// Session and credential
// =============================================================================

/// Browser session launches after the first one.
pub static SESSION_RESTARTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "seerrbridge_session_restarts_total",
        "Total automation surface recreations",
    )
    .unwrap()
});

/// Cycles that could not get the browser session, by cause.
pub static SESSION_ACQUIRE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seerrbridge_session_acquire_failures_total",
            "Failed browser session acquisitions",
        ),
        &["cause"], // "timeout", "launch", "closed"
    )
    .unwrap()
});

/// Torrents in the debrid library at the last stats refresh.
pub static LIBRARY_TORRENTS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("seerrbridge_library_torrents", "Torrents in the debrid library").unwrap()
});

pub static LIBRARY_SIZE_TB: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new(
        "seerrbridge_library_size_terabytes",
        "Total size of the debrid library",
    )
    .unwrap()
});

/// Snapshots captured for failed attempts.
pub static EVIDENCE_CAPTURED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seerrbridge_evidence_total", "Failure snapshots by result"),
        &["result"], // "stored", "failed"
    )
    .unwrap()
});

/// Token refreshes by result.
pub static TOKEN_REFRESHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seerrbridge_token_refreshes_total", "Total token refreshes"),
        &["result"], // "ok", "failed", "persist_failed"
    )
    .unwrap()
});

/// Audit events lost to a full channel, a closed writer or a failed write.
pub static AUDIT_EVENTS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "seerrbridge_audit_events_dropped_total",
        "Audit events that never reached the store",
    )
    .unwrap()
});

// =============================================================================
// External services
// =============================================================================

/// Request source calls by operation and status.
pub static SOURCE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seerrbridge_source_requests_total",
            "Total requests to the request source",
        ),
        &["operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Scheduler
        Box::new(CYCLES.clone()),
        Box::new(CYCLE_DURATION.clone()),
        Box::new(UNIT_OUTCOMES.clone()),
        Box::new(ATTEMPT_DURATION.clone()),
        Box::new(CANDIDATES_FOUND.clone()),
        Box::new(AUTH_PAUSED.clone()),
        // Session and credential
        Box::new(SESSION_RESTARTS.clone()),
        Box::new(SESSION_ACQUIRE_FAILURES.clone()),
        Box::new(LIBRARY_TORRENTS.clone()),
        Box::new(LIBRARY_SIZE_TB.clone()),
        Box::new(EVIDENCE_CAPTURED.clone()),
        Box::new(TOKEN_REFRESHES.clone()),
        Box::new(AUDIT_EVENTS_DROPPED.clone()),
        // External services
        Box::new(SOURCE_REQUESTS.clone()),
    ]
}
