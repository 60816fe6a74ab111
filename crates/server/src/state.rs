use std::sync::Arc;
use std::time::Instant;

use seerrbridge_core::{
    AuditStore, BrowserSessionManager, Config, CredentialStore, EvidenceStore,
    RequestStore, SanitizedConfig, Scheduler,
};

/// Shared application state
pub struct AppState {
    config: Config,
    version: String,
    started_at: Instant,
    audit_store: Arc<dyn AuditStore>,
    request_store: Arc<dyn RequestStore>,
    scheduler: Arc<Scheduler>,
    sessions: Arc<BrowserSessionManager>,
    credentials: Arc<CredentialStore>,
    evidence: Arc<EvidenceStore>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        version: impl Into<String>,
        audit_store: Arc<dyn AuditStore>,
        request_store: Arc<dyn RequestStore>,
        scheduler: Arc<Scheduler>,
        sessions: Arc<BrowserSessionManager>,
        credentials: Arc<CredentialStore>,
        evidence: Arc<EvidenceStore>,
    ) -> Self {
        Self {
            config,
            version: version.into(),
            started_at: Instant::now(),
            audit_store,
            request_store,
            scheduler,
            sessions,
            credentials,
            evidence,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn audit_store(&self) -> &Arc<dyn AuditStore> {
        &self.audit_store
    }

    pub fn request_store(&self) -> &Arc<dyn RequestStore> {
        &self.request_store
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn sessions(&self) -> &Arc<BrowserSessionManager> {
        &self.sessions
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn evidence(&self) -> &Arc<EvidenceStore> {
        &self.evidence
    }
}
