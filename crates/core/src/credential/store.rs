//! In-memory credential holder with proactive refresh.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{Credential, CredentialError, CredentialPersistence, CredentialStatus, TokenGrant};
use crate::audit::{AuditEvent, AuditHandle};
use crate::metrics;

/// Exchanges a refresh token for a new access/refresh pair.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    fn name(&self) -> &str;

    async fn exchange(&self, credential: &Credential) -> Result<TokenGrant, CredentialError>;
}

struct CredentialState {
    credential: Credential,
    /// Refreshed in memory but not yet on disk.
    persist_pending: bool,
    last_refresh: Option<DateTime<Utc>>,
    refresh_count: u64,
}

/// Holds the provider credential and keeps it valid.
///
/// All access goes through one async mutex, so a refresh in flight is never
/// observed half-written and concurrent callers share a single refresh.
pub struct CredentialStore {
    state: Mutex<CredentialState>,
    endpoint: Arc<dyn TokenEndpoint>,
    persistence: Arc<dyn CredentialPersistence>,
    margin: Duration,
    audit: Option<AuditHandle>,
}

impl CredentialStore {
    pub fn new(
        credential: Credential,
        endpoint: Arc<dyn TokenEndpoint>,
        persistence: Arc<dyn CredentialPersistence>,
        margin: std::time::Duration,
    ) -> Self {
        Self {
            state: Mutex::new(CredentialState {
                credential,
                persist_pending: false,
                last_refresh: None,
                refresh_count: 0,
            }),
            endpoint,
            persistence,
            margin: Duration::from_std(margin).unwrap_or_else(|_| Duration::minutes(10)),
            audit: None,
        }
    }

    /// Load the persisted credential and build a store around it.
    pub fn load(
        endpoint: Arc<dyn TokenEndpoint>,
        persistence: Arc<dyn CredentialPersistence>,
        margin: std::time::Duration,
    ) -> Result<Self, CredentialError> {
        let credential = persistence.load()?;
        info!(
            expiry = %credential.expiry,
            endpoint = endpoint.name(),
            "Loaded provider credential"
        );
        Ok(Self::new(credential, endpoint, persistence, margin))
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    /// A credential whose access token is valid for at least the refresh margin,
    /// refreshing first when needed.
    pub async fn get_valid_credential(&self) -> Result<Credential, CredentialError> {
        let mut state = self.state.lock().await;
        self.flush_pending(&mut state)?;

        let now = Utc::now();
        if state.credential.needs_refresh(now, self.margin) {
            debug!(expiry = %state.credential.expiry, "Access token inside refresh margin");
            self.refresh_locked(&mut state).await?;
        }

        if state.credential.is_expired(Utc::now()) {
            return Err(CredentialError::AuthFailure(
                "access token expired after refresh".to_string(),
            ));
        }

        Ok(state.credential.clone())
    }

    /// A non-expired access token.
    pub async fn get_valid_token(&self) -> Result<String, CredentialError> {
        self.get_valid_credential()
            .await
            .map(|credential| credential.access_token)
    }

    /// Force a refresh regardless of the remaining validity.
    pub async fn refresh(&self) -> Result<(), CredentialError> {
        let mut state = self.state.lock().await;
        self.flush_pending(&mut state)?;
        self.refresh_locked(&mut state).await
    }

    pub async fn status(&self) -> CredentialStatus {
        let state = self.state.lock().await;
        let now = Utc::now();
        CredentialStatus {
            expiry: state.credential.expiry,
            expired: state.credential.is_expired(now),
            needs_refresh: state.credential.needs_refresh(now, self.margin),
            persist_pending: state.persist_pending,
            last_refresh: state.last_refresh,
            refresh_count: state.refresh_count,
        }
    }

    /// Retry a write that failed after an earlier successful refresh.
    fn flush_pending(&self, state: &mut CredentialState) -> Result<(), CredentialError> {
        if !state.persist_pending {
            return Ok(());
        }
        self.persistence.save(&state.credential)?;
        state.persist_pending = false;
        info!("Persisted previously refreshed credential");
        Ok(())
    }

    async fn refresh_locked(&self, state: &mut CredentialState) -> Result<(), CredentialError> {
        let grant = match self.endpoint.exchange(&state.credential).await {
            Ok(grant) => grant,
            Err(e) => {
                warn!(error = %e, "Token refresh failed, keeping previous credential");
                metrics::TOKEN_REFRESHES.with_label_values(&["failed"]).inc();
                self.emit(AuditEvent::TokenRefreshFailed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let now = Utc::now();
        let next = state.credential.with_grant(grant, now);
        let persisted = self.persistence.save(&next);

        // The provider may already have invalidated the old refresh token,
        // so the new pair is kept even when the write fails.
        state.credential = next;
        state.last_refresh = Some(now);
        state.refresh_count += 1;

        match persisted {
            Ok(()) => {
                state.persist_pending = false;
                info!(expiry = %state.credential.expiry, "Refreshed provider credential");
                metrics::TOKEN_REFRESHES.with_label_values(&["ok"]).inc();
                self.emit(AuditEvent::TokenRefreshed {
                    expiry: state.credential.expiry,
                });
                Ok(())
            }
            Err(e) => {
                state.persist_pending = true;
                error!(error = %e, "Refreshed credential could not be persisted");
                metrics::TOKEN_REFRESHES
                    .with_label_values(&["persist_failed"])
                    .inc();
                self.emit(AuditEvent::TokenRefreshFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.try_emit(event);
        }
    }
}
