use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::types::{EngineOutcome, NO_MATCH, READY_MARKER_TIMEOUT};
use crate::audit::{AuditEvent, AuditHandle};
use crate::credential::CredentialStore;
use crate::metrics;
use crate::request::WorkUnit;
use crate::selection::{Selection, Selector};
use crate::session::SessionHandle;
use crate::surface::{SearchTarget, SurfaceError};

/// Processes units on the automation surface.
pub struct SelectionEngine {
    selector: Selector,
    credentials: Arc<CredentialStore>,
    step_timeout: Duration,
    ready_timeout: Duration,
    audit: Option<AuditHandle>,
}

impl SelectionEngine {
    pub fn new(
        selector: Selector,
        credentials: Arc<CredentialStore>,
        step_timeout: Duration,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            selector,
            credentials,
            step_timeout,
            ready_timeout,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Process one unit with an acquired session.
    ///
    /// Automation errors and step timeouts flag the session unhealthy and are
    /// reported as retryable.
    pub async fn process(&self, unit: &WorkUnit, handle: &mut SessionHandle) -> EngineOutcome {
        match self.run(unit, handle).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                warn!(unit = %unit.label(), %reason, "Automation step failed");
                handle.mark_unhealthy(&reason);
                EngineOutcome::RetryableFailure(reason)
            }
        }
    }

    async fn run(
        &self,
        unit: &WorkUnit,
        handle: &mut SessionHandle,
    ) -> Result<EngineOutcome, String> {
        let surface = handle.surface().map_err(|e| e.to_string())?;
        let target = SearchTarget::from(unit);

        bounded("navigate", self.step_timeout, surface.navigate(&target)).await?;
        let found = bounded("search", self.step_timeout, surface.search(&target)).await?;
        metrics::CANDIDATES_FOUND
            .with_label_values(&[])
            .observe(found.len() as f64);
        debug!(unit = %unit.label(), count = found.len(), "Collected candidates");

        let candidate = match self.selector.select(unit.kind, found) {
            Selection::InLibrary(present) => {
                info!(unit = %unit.label(), title = %present.title, "Already in library");
                return Ok(EngineOutcome::Completed {
                    candidate: Some(present.title),
                });
            }
            Selection::NoMatch { found, excluded } => {
                info!(unit = %unit.label(), found, excluded, "No candidate survived selection");
                return Ok(EngineOutcome::PermanentFailure(NO_MATCH.to_string()));
            }
            Selection::Chosen { candidate, tier } => {
                info!(
                    unit = %unit.label(),
                    title = %candidate.title,
                    tier = %tier,
                    cached = candidate.cached,
                    "Chose candidate"
                );
                if let Some(ref audit) = self.audit {
                    audit
                        .emit(AuditEvent::CandidateSelected {
                            request_id: unit.request_id.clone(),
                            season: unit.season,
                            title: candidate.title.clone(),
                            tier,
                            cached: candidate.cached,
                        })
                        .await;
                }
                candidate
            }
        };

        let credential = match self.credentials.get_valid_credential().await {
            Ok(credential) => credential,
            Err(e) => return Ok(EngineOutcome::AuthFailure(e.to_string())),
        };

        bounded(
            "trigger_fetch",
            self.step_timeout,
            surface.trigger_fetch(&candidate, &credential),
        )
        .await?;

        // The surface gives up after ready_timeout; the outer bound only
        // catches a surface that stops answering.
        let ready = bounded(
            "await_ready",
            self.ready_timeout + self.step_timeout,
            surface.await_ready(&candidate, self.ready_timeout),
        )
        .await?;

        if ready {
            info!(unit = %unit.label(), title = %candidate.title, "Fetch ready");
            Ok(EngineOutcome::Completed {
                candidate: Some(candidate.title),
            })
        } else {
            Ok(EngineOutcome::RetryableFailure(
                READY_MARKER_TIMEOUT.to_string(),
            ))
        }
    }
}

async fn bounded<T>(
    step: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T, SurfaceError>>,
) -> Result<T, String> {
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{} failed: {}", step, e)),
        Err(_) => Err(format!("{} timed out after {:?}", step, limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{CredentialPersistence, CredentialError, TokenEndpoint};
    use crate::selection::{default_exclude_pattern, default_tiers, SizeCeilings, TierList};
    use crate::session::BrowserSessionManager;
    use crate::surface::SurfaceFactory;
    use crate::testing::{
        fixtures, MemoryCredentialPersistence, MockSurfaceFactory, MockTokenEndpoint,
        ScriptedSurface, SurfaceCall, SurfaceStep,
    };
    use crate::request::MediaIds;

    struct Harness {
        engine: SelectionEngine,
        sessions: BrowserSessionManager,
        surface: ScriptedSurface,
        endpoint: Arc<MockTokenEndpoint>,
    }

    fn harness(credential_valid_for: chrono::Duration, episode_gb: f64) -> Harness {
        let surface = ScriptedSurface::new();
        let factory = MockSurfaceFactory::new(surface.clone());
        let sessions = BrowserSessionManager::new(
            Arc::new(factory) as Arc<dyn SurfaceFactory>,
            Duration::from_secs(5),
        );

        let credential = fixtures::credential(credential_valid_for);
        let endpoint = Arc::new(MockTokenEndpoint::new());
        let credentials = Arc::new(CredentialStore::new(
            credential.clone(),
            Arc::clone(&endpoint) as Arc<dyn TokenEndpoint>,
            Arc::new(MemoryCredentialPersistence::new(credential)) as Arc<dyn CredentialPersistence>,
            Duration::from_secs(600),
        ));

        let tiers = TierList::compile(&default_tiers(), default_exclude_pattern().as_deref()).unwrap();
        let selector = Selector::new(tiers, SizeCeilings::from_gb(0.0, episode_gb));
        let engine = SelectionEngine::new(
            selector,
            credentials,
            Duration::from_millis(200),
            Duration::from_millis(100),
        );

        Harness {
            engine,
            sessions,
            surface,
            endpoint,
        }
    }

    fn movie() -> WorkUnit {
        WorkUnit {
            request_id: "1".into(),
            kind: crate::request::MediaKind::Movie,
            title: "Arrival".into(),
            year: Some(2016),
            ids: MediaIds {
                imdb_id: Some("tt2543164".into()),
                ..Default::default()
            },
            season: None,
            attempts: 0,
        }
    }

    #[tokio::test]
    async fn test_cached_candidate_in_best_tier_is_fetched() {
        let h = harness(chrono::Duration::hours(2), 0.0);
        h.surface
            .set_results(vec![
                fixtures::candidate(0, "Arrival.2016.720p", 3.0, true),
                fixtures::candidate(1, "Arrival.2016.1080p.x264", 8.0, false),
                fixtures::candidate(2, "Arrival.2016.1080p.x265", 6.0, true),
            ])
            .await;

        let mut handle = h.sessions.acquire().await.unwrap();
        let outcome = h.engine.process(&movie(), &mut handle).await;
        assert_eq!(
            outcome,
            EngineOutcome::Completed {
                candidate: Some("Arrival.2016.1080p.x265".into())
            }
        );
        assert!(!handle.is_unhealthy());

        let calls = h.surface.calls().await;
        assert!(calls.contains(&SurfaceCall::TriggerFetch {
            candidate: "Arrival.2016.1080p.x265".into(),
            access_token: "initial-access".into(),
        }));
    }

    #[tokio::test]
    async fn test_no_candidates_is_permanent() {
        let h = harness(chrono::Duration::hours(2), 0.0);
        h.surface
            .set_results(vec![fixtures::candidate(0, "Arrival.2016.CAM", 1.0, true)])
            .await;

        let mut handle = h.sessions.acquire().await.unwrap();
        let outcome = h.engine.process(&movie(), &mut handle).await;
        assert_eq!(outcome, EngineOutcome::PermanentFailure(NO_MATCH.into()));
        assert_eq!(h.surface.fetch_count().await, 0);
    }

    #[tokio::test]
    async fn test_in_library_completes_without_fetch() {
        let h = harness(chrono::Duration::hours(2), 0.0);
        let mut present = fixtures::candidate(0, "Arrival.2016.2160p", 40.0, true);
        present.in_library = true;
        h.surface.set_results(vec![present]).await;

        let mut handle = h.sessions.acquire().await.unwrap();
        let outcome = h.engine.process(&movie(), &mut handle).await;
        assert!(matches!(outcome, EngineOutcome::Completed { .. }));
        assert_eq!(h.surface.fetch_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_ready_marker_is_retryable() {
        let h = harness(chrono::Duration::hours(2), 0.0);
        h.surface
            .set_results(vec![fixtures::candidate(0, "Arrival.2016.1080p", 8.0, false)])
            .await;
        h.surface.set_never_ready("Arrival.2016.1080p").await;

        let mut handle = h.sessions.acquire().await.unwrap();
        let outcome = h.engine.process(&movie(), &mut handle).await;
        assert_eq!(
            outcome,
            EngineOutcome::RetryableFailure(READY_MARKER_TIMEOUT.into())
        );
        assert!(!handle.is_unhealthy());
    }

    #[tokio::test]
    async fn test_surface_error_marks_session_unhealthy() {
        let h = harness(chrono::Duration::hours(2), 0.0);
        h.surface
            .fail_next(
                SurfaceStep::Search,
                SurfaceError::Disconnected("target closed".into()),
            )
            .await;

        let mut handle = h.sessions.acquire().await.unwrap();
        let outcome = h.engine.process(&movie(), &mut handle).await;
        assert!(matches!(outcome, EngineOutcome::RetryableFailure(ref r) if r.starts_with("search failed")));
        assert!(handle.is_unhealthy());
    }

    #[tokio::test]
    async fn test_step_timeout_marks_session_unhealthy() {
        let h = harness(chrono::Duration::hours(2), 0.0);
        h.surface
            .set_delay(SurfaceStep::Navigate, Duration::from_secs(5))
            .await;

        let mut handle = h.sessions.acquire().await.unwrap();
        let outcome = h.engine.process(&movie(), &mut handle).await;
        assert!(matches!(outcome, EngineOutcome::RetryableFailure(ref r) if r.contains("timed out")));
        assert!(handle.is_unhealthy());
    }

    #[tokio::test]
    async fn test_refresh_failure_is_auth_failure() {
        let h = harness(chrono::Duration::minutes(1), 0.0);
        h.endpoint
            .set_next_error(CredentialError::AuthFailure("invalid_grant".into()))
            .await;
        h.surface
            .set_results(vec![fixtures::candidate(0, "Arrival.2016.1080p", 8.0, true)])
            .await;

        let mut handle = h.sessions.acquire().await.unwrap();
        let outcome = h.engine.process(&movie(), &mut handle).await;
        assert!(matches!(outcome, EngineOutcome::AuthFailure(_)));
        assert_eq!(h.surface.fetch_count().await, 0);
        assert!(!handle.is_unhealthy());
    }

    #[tokio::test]
    async fn test_token_refreshed_lazily_before_fetch() {
        let h = harness(chrono::Duration::minutes(1), 0.0);
        h.surface
            .set_results(vec![fixtures::candidate(0, "Arrival.2016.1080p", 8.0, true)])
            .await;

        let mut handle = h.sessions.acquire().await.unwrap();
        let outcome = h.engine.process(&movie(), &mut handle).await;
        assert!(matches!(outcome, EngineOutcome::Completed { .. }));
        assert_eq!(h.endpoint.exchange_count().await, 1);
        assert!(h.surface.calls().await.contains(&SurfaceCall::TriggerFetch {
            candidate: "Arrival.2016.1080p".into(),
            access_token: "access-1".into(),
        }));
    }

    #[tokio::test]
    async fn test_episode_ceiling_applies_to_seasons() {
        let h = harness(chrono::Duration::hours(2), 1.0);
        h.surface
            .set_results(vec![
                fixtures::candidate(0, "Show.S01.1080p.a", 0.5, false),
                fixtures::candidate(1, "Show.S01.1080p.b", 2.0, true),
                fixtures::candidate(2, "Show.S01.1080p.c", 6.0, true),
            ])
            .await;
        let unit = WorkUnit {
            kind: crate::request::MediaKind::Show,
            title: "Show".into(),
            season: Some(1),
            ..movie()
        };

        let mut handle = h.sessions.acquire().await.unwrap();
        let outcome = h.engine.process(&unit, &mut handle).await;
        assert_eq!(
            outcome,
            EngineOutcome::Completed {
                candidate: Some("Show.S01.1080p.a".into())
            }
        );
    }
}
