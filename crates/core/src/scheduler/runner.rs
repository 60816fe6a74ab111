//! Scheduler implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::types::{
    AuthPause, CycleOutcome, CycleReport, SchedulerError, SchedulerStatus, SkipReason, TriggerAck,
    TriggerSource,
};
use crate::audit::{AuditEvent, AuditHandle};
use crate::config::SchedulerConfig;
use crate::credential::CredentialStore;
use crate::metrics;
use crate::recovery::{Disposition, RecoveryController};
use crate::request::{
    EligibleUnits, MediaKind, RequestStore, RequestStoreError, Transition, UpsertOutcome, WorkUnit,
};
use crate::session::BrowserSessionManager;
use crate::source::RequestSource;

#[derive(Debug, Default)]
struct JobState {
    last_trigger: Option<TriggerSource>,
    last_trigger_at: Option<chrono::DateTime<Utc>>,
    /// Source of the trigger waiting behind the running cycle.
    pending_trigger: Option<TriggerSource>,
    last_run_started: Option<chrono::DateTime<Utc>>,
    last_run_completed: Option<chrono::DateTime<Utc>>,
    last_error: Option<String>,
    auth_pause: Option<AuthPause>,
    last_report: Option<CycleReport>,
}

/// Drives request units through the engine, one at a time.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn RequestStore>,
    /// Absent when the request source is disabled; cycles then work from
    /// stored state only.
    source: Option<Arc<dyn RequestSource>>,
    sessions: Arc<BrowserSessionManager>,
    credentials: Arc<CredentialStore>,
    recovery: Arc<RecoveryController>,
    audit: Option<AuditHandle>,

    // Runtime state
    running: AtomicBool,
    stop_requested: AtomicBool,
    cycle_active: AtomicBool,
    cycle_lock: Mutex<()>,
    wake: Notify,
    shutdown_tx: broadcast::Sender<()>,
    worker: StdMutex<Option<JoinHandle<()>>>,
    state: StdMutex<JobState>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn RequestStore>,
        source: Option<Arc<dyn RequestSource>>,
        sessions: Arc<BrowserSessionManager>,
        credentials: Arc<CredentialStore>,
        recovery: Arc<RecoveryController>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            store,
            source,
            sessions,
            credentials,
            recovery,
            audit: None,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            cycle_active: AtomicBool::new(false),
            cycle_lock: Mutex::new(()),
            wake: Notify::new(),
            shutdown_tx,
            worker: StdMutex::new(None),
            state: StdMutex::new(JobState::default()),
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    /// Start the worker. Units left in progress by an earlier run are
    /// returned to pending first.
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return Ok(());
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            timer = self.config.enabled,
            "Starting scheduler"
        );

        let reset = match self.store.reset_in_progress() {
            Ok(reset) => reset,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        if reset > 0 {
            info!(count = reset, "Returned interrupted units to pending");
        }

        self.spawn_worker();

        if self.config.run_on_start {
            self.trigger(TriggerSource::Startup);
        }

        info!("Scheduler started");
        Ok(())
    }

    /// Stop the worker, waiting for the unit in flight to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Scheduler not running");
            return;
        }

        info!("Stopping scheduler");
        self.stop_requested.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Scheduler worker ended abnormally");
            }
        }

        info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the worker for a cycle. Triggers arriving while a cycle runs
    /// collapse into one follow-up cycle.
    pub fn trigger(&self, source: TriggerSource) -> TriggerAck {
        let accepted = self.is_running();
        let coalesced = self.cycle_active.load(Ordering::SeqCst);

        if accepted {
            {
                let mut state = self.state.lock().unwrap();
                state.last_trigger = Some(source);
                state.last_trigger_at = Some(Utc::now());
                state.pending_trigger = Some(source);
            }
            self.wake.notify_one();
            debug!(source = source.as_str(), coalesced, "Cycle triggered");
        } else {
            debug!(source = source.as_str(), "Trigger ignored, scheduler not running");
        }

        TriggerAck {
            source,
            accepted,
            coalesced: accepted && coalesced,
        }
    }

    /// Reset a unit (or every unit of a request) to pending and ask for a cycle.
    pub async fn resubmit(
        &self,
        request_id: &str,
        season: Option<u32>,
    ) -> Result<Vec<Transition>, SchedulerError> {
        let transitions = self.store.resubmit(request_id, season)?;
        if let Some(ref audit) = self.audit {
            for transition in &transitions {
                audit
                    .emit(AuditEvent::UnitResubmitted {
                        request_id: request_id.to_string(),
                        season,
                        previous_state: transition.from.state_type().to_string(),
                    })
                    .await;
            }
        }
        info!(request_id, ?season, units = transitions.len(), "Request resubmitted");
        self.trigger(TriggerSource::Manual);
        Ok(transitions)
    }

    pub fn status(&self) -> SchedulerStatus {
        let unit_counts = match self.store.count_units_by_state() {
            Ok(counts) => counts.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "Failed to count units");
                Default::default()
            }
        };

        let state = self.state.lock().unwrap();
        SchedulerStatus {
            running: self.is_running(),
            cycle_running: self.cycle_active.load(Ordering::SeqCst),
            last_trigger: state.last_trigger,
            last_trigger_at: state.last_trigger_at,
            last_run_started: state.last_run_started,
            last_run_completed: state.last_run_completed,
            last_error: state.last_error.clone(),
            auth_pause: state.auth_pause.clone(),
            last_report: state.last_report.clone(),
            unit_counts,
        }
    }

    fn spawn_worker(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        let timer_enabled = self.config.enabled;

        let worker = tokio::spawn(async move {
            info!("Scheduler worker started");
            loop {
                let trigger = tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Scheduler worker received shutdown signal");
                        break;
                    }
                    _ = scheduler.wake.notified() => {
                        scheduler
                            .state
                            .lock()
                            .unwrap()
                            .pending_trigger
                            .take()
                            .unwrap_or(TriggerSource::Manual)
                    }
                    _ = tokio::time::sleep(poll_interval), if timer_enabled => {
                        let mut state = scheduler.state.lock().unwrap();
                        state.last_trigger = Some(TriggerSource::Timer);
                        state.last_trigger_at = Some(Utc::now());
                        TriggerSource::Timer
                    }
                };

                if !scheduler.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = scheduler.run_cycle(trigger).await {
                    warn!(error = %e, "Cycle failed");
                }
            }
            info!("Scheduler worker stopped");
        });

        *self.worker.lock().unwrap() = Some(worker);
    }

    /// Run one cycle now. Returns `Skipped(AlreadyRunning)` when another
    /// cycle holds the cycle lock.
    pub async fn run_cycle(&self, trigger: TriggerSource) -> Result<CycleOutcome, SchedulerError> {
        let _cycle = match self.cycle_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(trigger = trigger.as_str(), "Cycle already running");
                metrics::CYCLES
                    .with_label_values(&[trigger.as_str(), "skipped"])
                    .inc();
                return Ok(CycleOutcome::Skipped(SkipReason::AlreadyRunning));
            }
        };

        self.cycle_active.store(true, Ordering::SeqCst);
        let outcome = self.run_locked_cycle(trigger).await;
        self.cycle_active.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run_locked_cycle(&self, trigger: TriggerSource) -> Result<CycleOutcome, SchedulerError> {
        let started_at = Utc::now();
        self.state.lock().unwrap().last_run_started = Some(started_at);
        info!(trigger = trigger.as_str(), "Cycle started");

        if let Some(reason) = self.check_auth_pause().await {
            self.state.lock().unwrap().last_run_completed = Some(Utc::now());
            metrics::CYCLES
                .with_label_values(&[trigger.as_str(), "auth_paused"])
                .inc();
            return Ok(CycleOutcome::Skipped(SkipReason::AuthPaused { detail: reason }));
        }

        let mut report = CycleReport::new(trigger, started_at);
        let result = self.run_cycle_inner(&mut report).await;
        report.finished_at = Utc::now();
        if let Err(ref e) = result {
            report.error = Some(e.to_string());
        }

        {
            let mut state = self.state.lock().unwrap();
            state.last_run_completed = Some(report.finished_at);
            if let Some(ref e) = report.error {
                state.last_error = Some(e.clone());
            } else if let Some(ref e) = report.session_error {
                state.last_error = Some(e.clone());
            } else if let Some(ref e) = report.source_error {
                state.last_error = Some(e.clone());
            }
            state.last_report = Some(report.clone());
        }

        let result_label = if report.auth_paused {
            "auth_paused"
        } else if report.error.is_some() {
            "error"
        } else {
            "completed"
        };
        metrics::CYCLES
            .with_label_values(&[trigger.as_str(), result_label])
            .inc();
        metrics::CYCLE_DURATION
            .with_label_values(&[])
            .observe(report.duration_ms() as f64 / 1000.0);

        info!(
            trigger = trigger.as_str(),
            processed = report.processed,
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            auth_paused = report.auth_paused,
            duration_ms = report.duration_ms(),
            "Cycle finished"
        );
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::CycleCompleted {
                    trigger: trigger.as_str().to_string(),
                    processed: report.processed,
                    completed: report.completed,
                    retried: report.retried,
                    failed: report.failed,
                    auth_paused: report.auth_paused,
                    duration_ms: report.duration_ms(),
                })
                .await;
        }

        result.map(|_| CycleOutcome::Completed(report))
    }

    async fn run_cycle_inner(&self, report: &mut CycleReport) -> Result<(), SchedulerError> {
        self.ingest(report).await;

        let promoted = self.store.promote_due_retries(Utc::now())?;
        if promoted > 0 {
            debug!(count = promoted, "Promoted due retries");
        }

        let mut eligible = EligibleUnits::new(self.store.as_ref(), Utc::now());
        while let Some(unit) = eligible.next_unit()? {
            if self.stop_requested.load(Ordering::SeqCst) {
                info!("Stop requested, ending cycle early");
                break;
            }

            let mut batch = vec![unit];
            if batch[0].kind == MediaKind::Show {
                let first_season = batch[0].season;
                let siblings = self
                    .store
                    .eligible_units_for(&batch[0].request_id, Utc::now())?;
                batch.extend(siblings.into_iter().filter(|u| u.season != first_season));
            }

            let mut handle = match self.sessions.acquire().await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(unit = %batch[0].label(), error = %e, "Browser session unavailable, ending drain");
                    metrics::SESSION_ACQUIRE_FAILURES
                        .with_label_values(&[e.cause()])
                        .inc();
                    report.session_error = Some(e.to_string());
                    return Ok(());
                }
            };
            for unit in batch {
                if self.stop_requested.load(Ordering::SeqCst) {
                    break;
                }

                let attempt = match self.recovery.attempt(&unit, &mut handle).await {
                    Ok(attempt) => attempt,
                    Err(RequestStoreError::InvalidState { current_state, .. }) => {
                        debug!(unit = %unit.label(), current_state, "Unit no longer eligible");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                match attempt.disposition {
                    Disposition::Complete => {
                        report.processed += 1;
                        report.completed += 1;
                        self.mark_available_if_done(&unit).await;
                    }
                    Disposition::Retry { .. } => {
                        report.processed += 1;
                        report.retried += 1;
                    }
                    Disposition::Fail { .. } => {
                        report.processed += 1;
                        report.failed += 1;
                    }
                    Disposition::PauseForAuth { reason } => {
                        report.auth_paused = true;
                        self.pause(reason).await;
                        return Ok(());
                    }
                }

                if handle.is_unhealthy() {
                    // Remaining seasons come back through the drain with a fresh session.
                    break;
                }
            }
            drop(handle);
        }

        Ok(())
    }

    /// Fetch approved requests and merge them into the store. Failures are
    /// recorded on the report; the cycle carries on with stored state.
    async fn ingest(&self, report: &mut CycleReport) {
        let Some(ref source) = self.source else {
            return;
        };
        let observed = match source.approved_requests().await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(source = source.name(), error = %e, "Failed to list approved requests");
                report.source_error = Some(e.to_string());
                return;
            }
        };

        for request in observed {
            match self.store.upsert_observed(&request) {
                Ok(UpsertOutcome::Created) => {
                    report.new_requests += 1;
                    info!(request_id = %request.id, title = %request.title, "New request");
                    if let Some(ref audit) = self.audit {
                        audit
                            .emit(AuditEvent::RequestObserved {
                                request_id: request.id.clone(),
                                kind: request.kind.as_str().to_string(),
                                title: request.title.clone(),
                                units: request.unit_seasons().len() as u32,
                            })
                            .await;
                    }
                }
                Ok(UpsertOutcome::SeasonsAdded(seasons)) => {
                    info!(request_id = %request.id, ?seasons, "New seasons requested");
                    if let Some(ref audit) = self.audit {
                        audit
                            .emit(AuditEvent::SeasonsAdded {
                                request_id: request.id.clone(),
                                seasons,
                            })
                            .await;
                    }
                }
                Ok(UpsertOutcome::Unchanged) => {}
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "Failed to store request");
                }
            }
        }
    }

    /// Report the request as available once every unit has completed.
    async fn mark_available_if_done(&self, unit: &WorkUnit) {
        let Some(ref source) = self.source else {
            return;
        };
        let request = match self.store.get(&unit.request_id) {
            Ok(Some(request)) if request.is_fully_completed() => request,
            Ok(_) => return,
            Err(e) => {
                warn!(request_id = %unit.request_id, error = %e, "Failed to load request");
                return;
            }
        };

        match source.mark_available(&request).await {
            Ok(()) => {
                info!(request_id = %request.id, title = %request.title, "Marked available");
                if let Some(ref audit) = self.audit {
                    audit
                        .emit(AuditEvent::RequestMarkedAvailable {
                            request_id: request.id.clone(),
                        })
                        .await;
                }
            }
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "Failed to mark request available");
            }
        }
    }

    /// While paused, try to refresh. Returns the reason when still paused.
    async fn check_auth_pause(&self) -> Option<String> {
        if self.state.lock().unwrap().auth_pause.is_none() {
            return None;
        }

        match self.credentials.refresh().await {
            Ok(()) => {
                self.resume().await;
                None
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(error = %reason, "Credential still unusable, skipping cycle");
                if let Some(pause) = self.state.lock().unwrap().auth_pause.as_mut() {
                    pause.reason = reason.clone();
                }
                Some(reason)
            }
        }
    }

    async fn pause(&self, reason: String) {
        let newly_paused = {
            let mut state = self.state.lock().unwrap();
            let newly_paused = state.auth_pause.is_none();
            state.auth_pause = Some(AuthPause {
                since: Utc::now(),
                reason: reason.clone(),
            });
            state.last_error = Some(reason.clone());
            newly_paused
        };
        metrics::AUTH_PAUSED.set(1);

        if newly_paused {
            warn!(%reason, "Automation paused until credentials recover");
            if let Some(ref audit) = self.audit {
                audit.emit(AuditEvent::SchedulerPaused { reason }).await;
            }
        }
    }

    async fn resume(&self) {
        self.state.lock().unwrap().auth_pause = None;
        metrics::AUTH_PAUSED.set(0);
        info!("Credentials recovered, automation resumed");
        if let Some(ref audit) = self.audit {
            audit.emit(AuditEvent::SchedulerResumed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{CredentialPersistence, TokenEndpoint};
    use crate::engine::SelectionEngine;
    use crate::recovery::{EvidenceStore, RetryPolicy};
    use crate::request::{SqliteRequestStore, UnitState};
    use crate::selection::{default_exclude_pattern, default_tiers, Selector, SizeCeilings, TierList};
    use crate::surface::SurfaceFactory;
    use crate::testing::{
        fixtures, MemoryCredentialPersistence, MockRequestSource, MockSurfaceFactory,
        MockTokenEndpoint, ScriptedSurface, SurfaceCall, SurfaceStep,
    };
    use tempfile::TempDir;

    struct Harness {
        scheduler: Arc<Scheduler>,
        store: Arc<SqliteRequestStore>,
        source: Arc<MockRequestSource>,
        surface: ScriptedSurface,
        factory: MockSurfaceFactory,
        sessions: Arc<BrowserSessionManager>,
        endpoint: Arc<MockTokenEndpoint>,
        _evidence_dir: TempDir,
    }

    async fn harness(credential_valid_for: chrono::Duration) -> Harness {
        harness_with(credential_valid_for, true).await
    }

    async fn harness_with(credential_valid_for: chrono::Duration, source_enabled: bool) -> Harness {
        let surface = ScriptedSurface::new();
        let factory = MockSurfaceFactory::new(surface.clone());
        let sessions = Arc::new(BrowserSessionManager::new(
            Arc::new(factory.clone()) as Arc<dyn SurfaceFactory>,
            Duration::from_millis(500),
        ));

        let credential = fixtures::credential(credential_valid_for);
        let endpoint = Arc::new(MockTokenEndpoint::new());
        let credentials = Arc::new(CredentialStore::new(
            credential.clone(),
            Arc::clone(&endpoint) as Arc<dyn TokenEndpoint>,
            Arc::new(MemoryCredentialPersistence::new(credential)) as Arc<dyn CredentialPersistence>,
            Duration::from_secs(600),
        ));

        let tiers = TierList::compile(&default_tiers(), default_exclude_pattern().as_deref()).unwrap();
        let engine = Arc::new(SelectionEngine::new(
            Selector::new(tiers, SizeCeilings::default()),
            Arc::clone(&credentials),
            Duration::from_secs(1),
            Duration::from_millis(100),
        ));

        let store = Arc::new(SqliteRequestStore::in_memory().unwrap());
        let evidence_dir = TempDir::new().unwrap();
        let evidence = Arc::new(EvidenceStore::open(evidence_dir.path(), 10).await.unwrap());
        let recovery = Arc::new(RecoveryController::new(
            engine,
            Arc::clone(&store) as Arc<dyn RequestStore>,
            evidence,
            RetryPolicy::default(),
            Duration::from_secs(5),
            Duration::from_secs(1),
        ));

        let source = Arc::new(MockRequestSource::new());
        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig {
                enabled: false,
                poll_interval_secs: 3600,
                run_on_start: false,
            },
            Arc::clone(&store) as Arc<dyn RequestStore>,
            source_enabled.then(|| Arc::clone(&source) as Arc<dyn RequestSource>),
            Arc::clone(&sessions),
            credentials,
            recovery,
        ));

        Harness {
            scheduler,
            store,
            source,
            surface,
            factory,
            sessions,
            endpoint,
            _evidence_dir: evidence_dir,
        }
    }

    fn completed(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Completed(report) => report,
            other => panic!("expected a completed cycle, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cycle_completes_and_marks_available() {
        let h = harness(chrono::Duration::hours(2)).await;
        h.source
            .add_request(fixtures::movie_request("1", "Arrival", 2016))
            .await;
        h.surface
            .set_results(vec![fixtures::candidate(0, "Arrival.2016.1080p", 8.0, true)])
            .await;

        let report = completed(h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap());
        assert_eq!(report.new_requests, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(h.source.marked_available().await, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_ingestion_is_idempotent() {
        let h = harness(chrono::Duration::hours(2)).await;
        h.source
            .add_request(fixtures::movie_request("1", "Arrival", 2016))
            .await;

        let first = completed(h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap());
        let second = completed(h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap());
        assert_eq!(first.new_requests, 1);
        assert_eq!(second.new_requests, 0);
        assert_eq!(
            h.store
                .count(&crate::request::RequestFilter::new())
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_units_processed_oldest_first() {
        let h = harness(chrono::Duration::hours(2)).await;
        let base = Utc::now() - chrono::Duration::hours(1);
        h.source
            .set_requests(vec![
                fixtures::movie_request("3", "Third", 2003).observed_at(base + chrono::Duration::minutes(3)),
                fixtures::movie_request("1", "First", 2001).observed_at(base + chrono::Duration::minutes(1)),
                fixtures::movie_request("2", "Second", 2002).observed_at(base + chrono::Duration::minutes(2)),
            ])
            .await;

        h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap();

        let navigated: Vec<String> = h
            .surface
            .calls()
            .await
            .into_iter()
            .filter_map(|c| match c {
                SurfaceCall::Navigate { title, .. } => Some(title),
                _ => None,
            })
            .collect();
        assert_eq!(navigated, vec!["First", "Second", "Third"]);
    }

    #[tokio::test]
    async fn test_disabled_source_works_from_stored_state() {
        let h = harness_with(chrono::Duration::hours(2), false).await;
        h.store
            .upsert_observed(&fixtures::movie_request("1", "Arrival", 2016))
            .unwrap();
        h.source
            .add_request(fixtures::movie_request("2", "Dune", 2021))
            .await;
        h.surface
            .set_results(vec![fixtures::candidate(0, "Arrival.2016.1080p", 8.0, true)])
            .await;

        let report = completed(h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap());
        assert_eq!(report.new_requests, 0);
        assert_eq!(report.completed, 1);
        assert_eq!(h.source.fetch_count().await, 0);
        assert!(h.source.marked_available().await.is_empty());
        assert!(h.store.get("2").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_acquire_timeout_ends_drain_cleanly() {
        let h = harness(chrono::Duration::hours(2)).await;
        h.source
            .add_request(fixtures::movie_request("1", "Arrival", 2016))
            .await;
        let held = h.sessions.acquire().await.unwrap();

        let report = completed(h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap());
        drop(held);

        assert_eq!(report.new_requests, 1);
        assert_eq!(report.processed, 0);
        assert!(report.error.is_none());
        assert!(report.session_error.as_deref().unwrap().contains("timed out"));
        assert_eq!(
            h.store.get("1").unwrap().unwrap().unit(None).unwrap().state,
            UnitState::Pending
        );
        let status = h.scheduler.status();
        assert!(!status.cycle_running);
        assert!(status.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_session_launch_failure_ends_drain_cleanly() {
        let h = harness(chrono::Duration::hours(2)).await;
        h.source
            .add_request(fixtures::movie_request("1", "Arrival", 2016))
            .await;
        h.factory.set_fail_launches(true);

        let report = completed(h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap());
        assert_eq!(report.processed, 0);
        assert!(report.session_error.is_some());

        h.factory.set_fail_launches(false);
        h.surface
            .set_results(vec![fixtures::candidate(0, "Arrival.2016.1080p", 8.0, true)])
            .await;
        let report = completed(h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap());
        assert_eq!(report.completed, 1);
        assert!(report.session_error.is_none());
    }

    #[tokio::test]
    async fn test_source_failure_uses_stored_state() {
        let h = harness(chrono::Duration::hours(2)).await;
        h.store
            .upsert_observed(&fixtures::movie_request("1", "Arrival", 2016))
            .unwrap();
        h.source.set_next_error("overseerr down").await;
        h.surface
            .set_results(vec![fixtures::candidate(0, "Arrival.2016.1080p", 8.0, true)])
            .await;

        let report = completed(h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap());
        assert!(report.source_error.is_some());
        assert_eq!(report.completed, 1);
    }

    #[tokio::test]
    async fn test_auth_failure_pauses_and_leaves_queue_untouched() {
        let h = harness(chrono::Duration::minutes(1)).await;
        h.endpoint.set_always_fail(true).await;
        let base = Utc::now() - chrono::Duration::hours(1);
        h.source
            .set_requests(vec![
                fixtures::movie_request("1", "First", 2001).observed_at(base),
                fixtures::movie_request("2", "Second", 2002).observed_at(base + chrono::Duration::minutes(1)),
            ])
            .await;
        h.surface
            .set_results(vec![fixtures::candidate(0, "Any.1080p", 8.0, true)])
            .await;

        let report = completed(h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap());
        assert!(report.auth_paused);
        assert_eq!(report.processed, 0);

        for id in ["1", "2"] {
            let request = h.store.get(id).unwrap().unwrap();
            assert_eq!(request.units[0].state, UnitState::Pending);
            assert_eq!(request.units[0].attempts, 0);
        }
        // The second request was never navigated to.
        assert!(!h.surface.calls().await.contains(&SurfaceCall::Navigate {
            title: "Second".into(),
            season: None
        }));

        let status = h.scheduler.status();
        assert!(status.auth_pause.is_some());

        // Still failing: the next cycle is skipped.
        let outcome = h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Skipped(SkipReason::AuthPaused { .. })
        ));

        // Refresh recovers: the cycle runs again.
        h.endpoint.set_always_fail(false).await;
        let report = completed(h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap());
        assert_eq!(report.completed, 2);
        assert!(h.scheduler.status().auth_pause.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_cycle_is_skipped() {
        let h = harness(chrono::Duration::hours(2)).await;
        h.source
            .add_request(fixtures::movie_request("1", "Arrival", 2016))
            .await;
        h.surface
            .set_delay(SurfaceStep::Navigate, Duration::from_millis(300))
            .await;

        let scheduler = Arc::clone(&h.scheduler);
        let running = tokio::spawn(async move { scheduler.run_cycle(TriggerSource::Timer).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap();
        assert!(matches!(
            outcome,
            CycleOutcome::Skipped(SkipReason::AlreadyRunning)
        ));
        assert!(matches!(
            running.await.unwrap().unwrap(),
            CycleOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_show_seasons_share_session() {
        let h = harness(chrono::Duration::hours(2)).await;
        h.source
            .add_request(fixtures::show_request("5", "Severance", 2022, vec![1, 2]))
            .await;
        h.surface
            .set_results(vec![fixtures::candidate(0, "Severance.S0X.1080p", 20.0, true)])
            .await;

        let report = completed(h.scheduler.run_cycle(TriggerSource::Manual).await.unwrap());
        assert_eq!(report.completed, 2);
        assert_eq!(h.source.marked_available().await, vec!["5".to_string()]);
        assert_eq!(h.scheduler.status().unit_counts.get("completed"), Some(&2));
    }

    #[tokio::test]
    async fn test_trigger_ignored_when_stopped() {
        let h = harness(chrono::Duration::hours(2)).await;
        let ack = h.scheduler.trigger(TriggerSource::Webhook);
        assert!(!ack.accepted);
    }
}
