//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the bridge:
//! - HTTP request metrics (latency, counts)
//! - Unit counts by state, scheduler and session status (collected dynamically)
//! - Everything registered by `seerrbridge_core::metrics`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use seerrbridge_core::request::UNIT_STATE_TYPES;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "seerrbridge_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seerrbridge_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "seerrbridge_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// State Metrics (collected dynamically)
// =============================================================================

/// Units by current state.
pub static UNITS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("seerrbridge_units_by_state", "Current unit count by state"),
        &["state"],
    )
    .unwrap()
});

/// Scheduler running state (1 = running, 0 = stopped).
pub static SCHEDULER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "seerrbridge_scheduler_running",
        "Whether the scheduler is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Browser session health (1 = healthy or not yet launched, 0 = flagged).
pub static SESSION_HEALTHY: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "seerrbridge_session_healthy",
        "Whether the browser session is healthy (1) or flagged for recreation (0)",
    )
    .unwrap()
});

/// Seconds until the provider access token expires (negative once expired).
pub static TOKEN_EXPIRES_IN: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "seerrbridge_token_expires_in_seconds",
        "Seconds until the provider access token expires",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // State
    registry.register(Box::new(UNITS_BY_STATE.clone())).unwrap();
    registry
        .register(Box::new(SCHEDULER_RUNNING.clone()))
        .unwrap();
    registry.register(Box::new(SESSION_HEALTHY.clone())).unwrap();
    registry
        .register(Box::new(TOKEN_EXPIRES_IN.clone()))
        .unwrap();

    // Core metrics (scheduler, session, credentials, request source)
    for metric in seerrbridge_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the store, scheduler,
/// session and credential as they are right now.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    SCHEDULER_RUNNING.set(if state.scheduler().is_running() { 1 } else { 0 });
    SESSION_HEALTHY.set(if state.sessions().status().healthy { 1 } else { 0 });

    let credential = state.credentials().status().await;
    TOKEN_EXPIRES_IN.set((credential.expiry - chrono::Utc::now()).num_seconds());

    if let Ok(counts) = state.request_store().count_units_by_state() {
        // States with no units are absent from the store's counts.
        for state_type in UNIT_STATE_TYPES {
            let count = counts
                .iter()
                .find(|(s, _)| s == state_type)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            UNITS_BY_STATE.with_label_values(&[state_type]).set(count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("seerrbridge_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_core_and_state_metrics() {
        // Prometheus only outputs vectors that have at least one child.
        HTTP_REQUEST_DURATION
            .with_label_values(&["GET", "/test", "200"])
            .observe(0.1);
        UNITS_BY_STATE.with_label_values(&["pending"]).set(0);
        SCHEDULER_RUNNING.set(0);
        seerrbridge_core::metrics::CYCLES
            .with_label_values(&["manual", "completed"])
            .inc();

        let output = encode_metrics();

        assert!(output.contains("seerrbridge_http_request_duration_seconds"));
        assert!(output.contains("seerrbridge_http_requests_in_flight"));
        assert!(output.contains("seerrbridge_units_by_state"));
        assert!(output.contains("seerrbridge_scheduler_running"));
        assert!(output.contains("seerrbridge_session_healthy"));
        assert!(output.contains("seerrbridge_cycles_total"));
        assert!(output.contains("seerrbridge_auth_paused"));
    }
}
