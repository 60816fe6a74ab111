//! Failure classification at the unit boundary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{EvidenceStore, RetryPolicy};
use crate::audit::{AuditEvent, AuditHandle};
use crate::engine::{EngineOutcome, SelectionEngine};
use crate::metrics;
use crate::request::{RequestStore, RequestStoreError, UnitOutcome, UnitState, WorkUnit};
use crate::session::SessionHandle;

/// Failure reason when a whole attempt exceeds its time limit.
pub const ATTEMPT_TIMEOUT: &str = "attempt-timeout";

/// Failure reason for a unit released after its outcome could not be stored.
pub const OUTCOME_NOT_RECORDED: &str = "outcome-not-recorded";

/// What happens to a unit after an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Disposition {
    Complete,
    Retry { delay_secs: u64 },
    Fail { reason: String },
    /// Leave the unit pending and stop processing until credentials recover.
    PauseForAuth { reason: String },
}

/// Result of one attempt on one unit.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub outcome: UnitOutcome,
    pub disposition: Disposition,
    pub attempts: u32,
    pub duration: Duration,
}

/// Runs attempts under a time limit and records their classified outcome.
pub struct RecoveryController {
    engine: Arc<SelectionEngine>,
    store: Arc<dyn RequestStore>,
    evidence: Arc<EvidenceStore>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    snapshot_timeout: Duration,
    audit: Option<AuditHandle>,
}

impl RecoveryController {
    pub fn new(
        engine: Arc<SelectionEngine>,
        store: Arc<dyn RequestStore>,
        evidence: Arc<EvidenceStore>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
        snapshot_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            evidence,
            policy,
            attempt_timeout,
            snapshot_timeout,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn evidence(&self) -> &Arc<EvidenceStore> {
        &self.evidence
    }

    /// Process one eligible unit end to end: mark it in progress, run the
    /// engine under the attempt timeout, capture evidence on failure and
    /// record the outcome.
    pub async fn attempt(
        &self,
        unit: &WorkUnit,
        handle: &mut SessionHandle,
    ) -> Result<AttemptReport, RequestStoreError> {
        let begun = self.store.begin_attempt(&unit.request_id, unit.season)?;
        self.emit_transition(unit, &begun.from, &begun.to, begun.attempts, None)
            .await;

        let start = Instant::now();
        let result =
            tokio::time::timeout(self.attempt_timeout, self.engine.process(unit, handle)).await;
        let outcome = match result {
            Ok(result) => classify(result),
            Err(_) => {
                warn!(unit = %unit.label(), timeout = ?self.attempt_timeout, "Attempt timed out");
                handle.mark_unhealthy(ATTEMPT_TIMEOUT);
                UnitOutcome::Retryable {
                    reason: ATTEMPT_TIMEOUT.to_string(),
                }
            }
        };
        let duration = start.elapsed();

        if matches!(
            outcome,
            UnitOutcome::Retryable { .. } | UnitOutcome::Permanent { .. }
        ) {
            self.capture_evidence(unit, handle).await;
        }

        let transition = match self.store.record_outcome(
            &unit.request_id,
            unit.season,
            &outcome,
            &self.policy,
        ) {
            Ok(transition) => transition,
            Err(e) => {
                self.release_unrecorded(unit, &e);
                return Err(e);
            }
        };

        let disposition = match &transition.to {
            UnitState::Completed { .. } => Disposition::Complete,
            UnitState::RetryPending { .. } => Disposition::Retry {
                delay_secs: self.policy.backoff_secs(transition.attempts),
            },
            UnitState::Failed { reason, .. } => Disposition::Fail {
                reason: reason.clone(),
            },
            _ => Disposition::PauseForAuth {
                reason: failure_reason(&outcome).unwrap_or("authorization failure").to_string(),
            },
        };

        metrics::UNIT_OUTCOMES
            .with_label_values(&[unit.kind.as_str(), outcome.as_str()])
            .inc();
        metrics::ATTEMPT_DURATION
            .with_label_values(&[outcome.as_str()])
            .observe(duration.as_secs_f64());

        info!(
            unit = %unit.label(),
            outcome = outcome.as_str(),
            attempts = transition.attempts,
            to = transition.to.state_type(),
            duration_ms = duration.as_millis() as u64,
            "Attempt finished"
        );
        self.emit_transition(
            unit,
            &transition.from,
            &transition.to,
            transition.attempts,
            failure_reason(&outcome).map(str::to_string),
        )
        .await;

        Ok(AttemptReport {
            outcome,
            disposition,
            attempts: transition.attempts,
            duration,
        })
    }

    /// Keep a unit whose outcome could not be written from staying in
    /// progress until the next restart. Best effort: a second failure is
    /// only logged.
    fn release_unrecorded(&self, unit: &WorkUnit, error: &RequestStoreError) {
        if matches!(error, RequestStoreError::InvalidState { .. }) {
            return;
        }
        warn!(unit = %unit.label(), error = %error, "Failed to record attempt outcome");

        let fallback = UnitOutcome::Retryable {
            reason: OUTCOME_NOT_RECORDED.to_string(),
        };
        match self
            .store
            .record_outcome(&unit.request_id, unit.season, &fallback, &self.policy)
        {
            Ok(transition) => {
                info!(unit = %unit.label(), to = transition.to.state_type(), "Released unrecorded unit");
            }
            Err(e) => {
                warn!(unit = %unit.label(), error = %e, "Unit stays in progress until restart");
            }
        }
    }

    async fn capture_evidence(&self, unit: &WorkUnit, handle: &mut SessionHandle) {
        let surface = match handle.surface() {
            Ok(surface) => surface,
            Err(_) => return,
        };

        let png = match tokio::time::timeout(self.snapshot_timeout, surface.snapshot()).await {
            Ok(Ok(png)) => png,
            Ok(Err(e)) => {
                debug!(unit = %unit.label(), error = %e, "Snapshot failed");
                metrics::EVIDENCE_CAPTURED.with_label_values(&["failed"]).inc();
                return;
            }
            Err(_) => {
                debug!(unit = %unit.label(), "Snapshot timed out");
                metrics::EVIDENCE_CAPTURED.with_label_values(&["failed"]).inc();
                return;
            }
        };

        match self.evidence.store(&unit.request_id, unit.season, &png).await {
            Ok(entry) => {
                metrics::EVIDENCE_CAPTURED.with_label_values(&["stored"]).inc();
                if let Some(ref audit) = self.audit {
                    audit
                        .emit(AuditEvent::EvidenceCaptured {
                            request_id: unit.request_id.clone(),
                            season: unit.season,
                            file: entry.file,
                        })
                        .await;
                }
            }
            Err(e) => {
                warn!(unit = %unit.label(), error = %e, "Failed to store snapshot");
                metrics::EVIDENCE_CAPTURED.with_label_values(&["failed"]).inc();
            }
        }
    }

    async fn emit_transition(
        &self,
        unit: &WorkUnit,
        from: &UnitState,
        to: &UnitState,
        attempts: u32,
        reason: Option<String>,
    ) {
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::UnitStateChanged {
                    request_id: unit.request_id.clone(),
                    season: unit.season,
                    from_state: from.state_type().to_string(),
                    to_state: to.state_type().to_string(),
                    attempts,
                    reason,
                })
                .await;
        }
    }
}

/// Map an engine result onto the outcome the request store records.
pub fn classify(outcome: EngineOutcome) -> UnitOutcome {
    match outcome {
        EngineOutcome::Completed { candidate } => UnitOutcome::Completed { candidate },
        EngineOutcome::RetryableFailure(reason) => UnitOutcome::Retryable { reason },
        EngineOutcome::PermanentFailure(reason) => UnitOutcome::Permanent { reason },
        EngineOutcome::AuthFailure(_) => UnitOutcome::AuthPaused,
    }
}

fn failure_reason(outcome: &UnitOutcome) -> Option<&str> {
    match outcome {
        UnitOutcome::Retryable { reason } | UnitOutcome::Permanent { reason } => Some(reason),
        _ => None,
    }
}
