//! Scripted automation surface for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::credential::Credential;
use crate::surface::{
    AutomationSurface, LibraryStats, SearchCandidate, SearchTarget, SurfaceError, SurfaceFactory,
};

/// Surface operations that can be scripted to fail or stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceStep {
    Navigate,
    Search,
    TriggerFetch,
    AwaitReady,
    LibraryStats,
    Snapshot,
}

/// A recorded surface call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Navigate { title: String, season: Option<u32> },
    Search { title: String, season: Option<u32> },
    TriggerFetch { candidate: String, access_token: String },
    AwaitReady { candidate: String },
    LibraryStats,
    Snapshot,
    Shutdown,
}

#[derive(Debug, Default)]
struct ScriptState {
    default_results: Vec<SearchCandidate>,
    results: HashMap<(String, Option<u32>), Vec<SearchCandidate>>,
    /// Titles whose ready marker never appears.
    never_ready: Vec<String>,
    /// Torrent count and size in TB shown on the library page.
    library: (u64, f64),
    failures: HashMap<SurfaceStep, SurfaceError>,
    persistent_failures: HashMap<SurfaceStep, String>,
    delays: HashMap<SurfaceStep, Duration>,
    calls: Vec<SurfaceCall>,
}

/// Mock implementation of the AutomationSurface trait.
///
/// Clones share one script, so a test keeps a clone while the session
/// manager owns the boxed surface.
///
/// # Example
///
/// ```rust,ignore
/// use seerrbridge_core::testing::{fixtures, ScriptedSurface};
///
/// let surface = ScriptedSurface::new();
/// surface.set_results(vec![fixtures::candidate(0, "Movie.1080p", 4.0, true)]).await;
/// surface.fail_next(SurfaceStep::Search, SurfaceError::Disconnected("gone".into())).await;
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedSurface {
    state: Arc<RwLock<ScriptState>>,
    alive: Arc<AtomicBool>,
    shut_down: Arc<AtomicBool>,
}

impl Default for ScriptedSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSurface {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            alive: Arc::new(AtomicBool::new(true)),
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Results returned for any target without specific results.
    pub async fn set_results(&self, results: Vec<SearchCandidate>) {
        self.state.write().await.default_results = results;
    }

    pub async fn set_results_for(
        &self,
        title: &str,
        season: Option<u32>,
        results: Vec<SearchCandidate>,
    ) {
        self.state
            .write()
            .await
            .results
            .insert((title.to_string(), season), results);
    }

    pub async fn set_library_stats(&self, torrents: u64, total_size_tb: f64) {
        self.state.write().await.library = (torrents, total_size_tb);
    }

    /// The ready marker never appears for this candidate title.
    pub async fn set_never_ready(&self, candidate_title: &str) {
        self.state
            .write()
            .await
            .never_ready
            .push(candidate_title.to_string());
    }

    /// Fail the next call of `step` once.
    pub async fn fail_next(&self, step: SurfaceStep, error: SurfaceError) {
        self.state.write().await.failures.insert(step, error);
    }

    /// Fail every call of `step` until cleared.
    pub async fn fail_always(&self, step: SurfaceStep, message: &str) {
        self.state
            .write()
            .await
            .persistent_failures
            .insert(step, message.to_string());
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.write().await;
        state.failures.clear();
        state.persistent_failures.clear();
    }

    /// Make `step` take this long before answering.
    pub async fn set_delay(&self, step: SurfaceStep, delay: Duration) {
        self.state.write().await.delays.insert(step, delay);
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub async fn calls(&self) -> Vec<SurfaceCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.write().await.calls.clear();
    }

    /// Number of fetches triggered so far.
    pub async fn fetch_count(&self) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|c| matches!(c, SurfaceCall::TriggerFetch { .. }))
            .count()
    }

    async fn step(&self, step: SurfaceStep, call: SurfaceCall) -> Result<(), SurfaceError> {
        let delay = {
            let mut state = self.state.write().await;
            state.calls.push(call);
            state.delays.get(&step).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        if let Some(error) = state.failures.remove(&step) {
            return Err(error);
        }
        if let Some(message) = state.persistent_failures.get(&step) {
            return Err(SurfaceError::Script(message.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl AutomationSurface for ScriptedSurface {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn navigate(&mut self, target: &SearchTarget) -> Result<(), SurfaceError> {
        self.step(
            SurfaceStep::Navigate,
            SurfaceCall::Navigate {
                title: target.title.clone(),
                season: target.season,
            },
        )
        .await
    }

    async fn search(&mut self, target: &SearchTarget) -> Result<Vec<SearchCandidate>, SurfaceError> {
        self.step(
            SurfaceStep::Search,
            SurfaceCall::Search {
                title: target.title.clone(),
                season: target.season,
            },
        )
        .await?;

        let state = self.state.read().await;
        Ok(state
            .results
            .get(&(target.title.clone(), target.season))
            .unwrap_or(&state.default_results)
            .clone())
    }

    async fn trigger_fetch(
        &mut self,
        candidate: &SearchCandidate,
        credential: &Credential,
    ) -> Result<(), SurfaceError> {
        self.step(
            SurfaceStep::TriggerFetch,
            SurfaceCall::TriggerFetch {
                candidate: candidate.title.clone(),
                access_token: credential.access_token.clone(),
            },
        )
        .await
    }

    async fn await_ready(
        &mut self,
        candidate: &SearchCandidate,
        timeout: Duration,
    ) -> Result<bool, SurfaceError> {
        self.step(
            SurfaceStep::AwaitReady,
            SurfaceCall::AwaitReady {
                candidate: candidate.title.clone(),
            },
        )
        .await?;

        let never = self
            .state
            .read()
            .await
            .never_ready
            .contains(&candidate.title);
        if never {
            tokio::time::sleep(timeout).await;
            return Ok(false);
        }
        Ok(true)
    }

    async fn library_stats(&mut self) -> Result<LibraryStats, SurfaceError> {
        self.step(SurfaceStep::LibraryStats, SurfaceCall::LibraryStats)
            .await?;
        let (torrents, total_size_tb) = self.state.read().await.library;
        Ok(LibraryStats {
            torrents,
            total_size_tb,
            refreshed_at: Utc::now(),
        })
    }

    async fn snapshot(&mut self) -> Result<Vec<u8>, SurfaceError> {
        self.step(SurfaceStep::Snapshot, SurfaceCall::Snapshot).await?;
        // PNG signature followed by a marker.
        Ok(b"\x89PNG\r\n\x1a\nscripted".to_vec())
    }

    async fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&mut self) -> Result<(), SurfaceError> {
        self.shut_down.store(true, Ordering::SeqCst);
        self.state.write().await.calls.push(SurfaceCall::Shutdown);
        Ok(())
    }
}

/// Mock implementation of the SurfaceFactory trait.
///
/// Every launch hands out a fresh clone of the same scripted surface.
#[derive(Debug, Clone)]
pub struct MockSurfaceFactory {
    surface: ScriptedSurface,
    launches: Arc<AtomicU64>,
    fail_launches: Arc<AtomicBool>,
}

impl MockSurfaceFactory {
    pub fn new(surface: ScriptedSurface) -> Self {
        Self {
            surface,
            launches: Arc::new(AtomicU64::new(0)),
            fail_launches: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn surface(&self) -> &ScriptedSurface {
        &self.surface
    }

    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn set_fail_launches(&self, fail: bool) {
        self.fail_launches.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SurfaceFactory for MockSurfaceFactory {
    fn name(&self) -> &str {
        "mock"
    }

    async fn launch(&self) -> Result<Box<dyn AutomationSurface>, SurfaceError> {
        if self.fail_launches.load(Ordering::SeqCst) {
            return Err(SurfaceError::Launch("mock: browser binary missing".into()));
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        let surface = self.surface.clone();
        surface.set_alive(true);
        surface.shut_down.store(false, Ordering::SeqCst);
        Ok(Box::new(surface))
    }
}
