//! Mock request source for testing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::request::{MediaRequest, ObservedRequest};
use crate::source::{RequestSource, SourceError};

/// Mock implementation of the RequestSource trait.
///
/// Returns whatever requests were configured and records every
/// `mark_available` call.
#[derive(Debug, Default)]
pub struct MockRequestSource {
    requests: Arc<RwLock<Vec<ObservedRequest>>>,
    marked_available: Arc<RwLock<Vec<String>>>,
    /// If set, the next listing fails with this message.
    next_error: Arc<RwLock<Option<String>>>,
    fetch_count: Arc<RwLock<usize>>,
}

impl MockRequestSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_requests(&self, requests: Vec<ObservedRequest>) {
        *self.requests.write().await = requests;
    }

    pub async fn add_request(&self, request: ObservedRequest) {
        self.requests.write().await.push(request);
    }

    pub async fn set_next_error(&self, message: impl Into<String>) {
        *self.next_error.write().await = Some(message.into());
    }

    /// Request ids reported as available, in call order.
    pub async fn marked_available(&self) -> Vec<String> {
        self.marked_available.read().await.clone()
    }

    pub async fn fetch_count(&self) -> usize {
        *self.fetch_count.read().await
    }
}

#[async_trait]
impl RequestSource for MockRequestSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn approved_requests(&self) -> Result<Vec<ObservedRequest>, SourceError> {
        *self.fetch_count.write().await += 1;
        if let Some(message) = self.next_error.write().await.take() {
            return Err(SourceError::Api {
                status: 503,
                message,
            });
        }
        Ok(self.requests.read().await.clone())
    }

    async fn mark_available(&self, request: &MediaRequest) -> Result<(), SourceError> {
        self.marked_available.write().await.push(request.id.clone());
        Ok(())
    }
}
