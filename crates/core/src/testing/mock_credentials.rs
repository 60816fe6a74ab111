//! Mock token endpoint and in-memory credential persistence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::credential::{
    Credential, CredentialError, CredentialPersistence, TokenEndpoint, TokenGrant,
};

/// Mock implementation of the TokenEndpoint trait.
///
/// Every successful exchange hands out a fresh, unique token pair valid for
/// one hour, and records the refresh token it was given.
#[derive(Debug, Default)]
pub struct MockTokenEndpoint {
    exchanges: AtomicU64,
    refresh_tokens: Arc<RwLock<Vec<String>>>,
    /// If set, the next exchange fails with this error.
    next_error: Arc<RwLock<Option<CredentialError>>>,
    /// If set, every exchange fails with an auth failure.
    always_fail: Arc<RwLock<bool>>,
    delay: Arc<RwLock<Option<Duration>>>,
    /// Lifetime handed out with each grant, one hour when unset.
    expires_in: Arc<RwLock<Option<u64>>>,
}

impl MockTokenEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of exchanges attempted, including failed ones.
    pub async fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub async fn recorded_refresh_tokens(&self) -> Vec<String> {
        self.refresh_tokens.read().await.clone()
    }

    pub async fn set_next_error(&self, error: CredentialError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn set_always_fail(&self, fail: bool) {
        *self.always_fail.write().await = fail;
    }

    pub async fn set_expires_in(&self, expires_in: u64) {
        *self.expires_in.write().await = Some(expires_in);
    }

    /// Simulated round-trip latency.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }
}

#[async_trait]
impl TokenEndpoint for MockTokenEndpoint {
    fn name(&self) -> &str {
        "mock"
    }

    async fn exchange(&self, credential: &Credential) -> Result<TokenGrant, CredentialError> {
        let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
        self.refresh_tokens
            .write()
            .await
            .push(credential.refresh_token.clone());

        if let Some(delay) = *self.delay.read().await {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }
        if *self.always_fail.read().await {
            return Err(CredentialError::AuthFailure("mock: invalid_grant".into()));
        }

        Ok(TokenGrant {
            access_token: format!("access-{}", n),
            refresh_token: format!("refresh-{}", n),
            expires_in: self.expires_in.read().await.unwrap_or(3600),
        })
    }
}

/// Credential persistence held in memory.
#[derive(Debug)]
pub struct MemoryCredentialPersistence {
    initial: Credential,
    saved: Mutex<Option<Credential>>,
    fail_saves: Mutex<bool>,
    save_count: AtomicU64,
}

impl MemoryCredentialPersistence {
    /// `initial` is what `load()` returns until something is saved.
    pub fn new(initial: Credential) -> Self {
        Self {
            initial,
            saved: Mutex::new(None),
            fail_saves: Mutex::new(false),
            save_count: AtomicU64::new(0),
        }
    }

    /// The last successfully saved credential.
    pub async fn saved(&self) -> Option<Credential> {
        self.saved.lock().unwrap().clone()
    }

    pub async fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock().unwrap() = fail;
    }

    pub async fn save_count(&self) -> u64 {
        self.save_count.load(Ordering::SeqCst)
    }
}

impl CredentialPersistence for MemoryCredentialPersistence {
    fn load(&self) -> Result<Credential, CredentialError> {
        Ok(self
            .saved
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| self.initial.clone()))
    }

    fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        if *self.fail_saves.lock().unwrap() {
            return Err(CredentialError::Persist("mock: disk full".into()));
        }
        *self.saved.lock().unwrap() = Some(credential.clone());
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
