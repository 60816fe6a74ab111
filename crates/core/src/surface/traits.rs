use std::time::Duration;

use async_trait::async_trait;

use super::{LibraryStats, SearchCandidate, SearchTarget, SurfaceError};
use crate::credential::Credential;

/// Capabilities the engine needs from the debrid UI.
///
/// Implementations hold exclusive, non-reentrant state; callers reach them
/// only through a [`crate::session::SessionHandle`].
#[async_trait]
pub trait AutomationSurface: Send + Sync {
    fn name(&self) -> &str;

    /// Open the search view for the target (and season, for shows).
    async fn navigate(&mut self, target: &SearchTarget) -> Result<(), SurfaceError>;

    /// Collect the results of the current view.
    async fn search(&mut self, target: &SearchTarget) -> Result<Vec<SearchCandidate>, SurfaceError>;

    /// Start the provider's instant fetch of a candidate.
    async fn trigger_fetch(
        &mut self,
        candidate: &SearchCandidate,
        credential: &Credential,
    ) -> Result<(), SurfaceError>;

    /// Wait up to `timeout` for the ready marker on a fetched candidate.
    async fn await_ready(
        &mut self,
        candidate: &SearchCandidate,
        timeout: Duration,
    ) -> Result<bool, SurfaceError>;

    /// Read the torrent count and total size from the library page.
    ///
    /// Leaves the surface on that page.
    async fn library_stats(&mut self) -> Result<LibraryStats, SurfaceError>;

    /// Rendered image of the current view (PNG).
    async fn snapshot(&mut self) -> Result<Vec<u8>, SurfaceError>;

    /// Cheap liveness probe.
    async fn is_alive(&mut self) -> bool;

    async fn shutdown(&mut self) -> Result<(), SurfaceError>;
}

/// Creates automation surfaces for the session manager.
#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    fn name(&self) -> &str;

    async fn launch(&self) -> Result<Box<dyn AutomationSurface>, SurfaceError>;
}
