use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::{LibraryStatsError, SessionError, SessionState, SessionStatus};
use crate::audit::{AuditEvent, AuditHandle};
use crate::metrics;
use crate::surface::{AutomationSurface, LibraryStats, SurfaceError, SurfaceFactory};

type Slot = Option<Box<dyn AutomationSurface>>;

#[derive(Debug, Default)]
struct Tracking {
    present: bool,
    busy: bool,
    launches: u64,
    restart_count: u64,
    last_activity: Option<DateTime<Utc>>,
    last_unhealthy_reason: Option<String>,
    library_stats: Option<LibraryStats>,
}

/// State shared between the manager and outstanding handles.
struct Shared {
    unhealthy: AtomicBool,
    tracking: StdMutex<Tracking>,
}

impl Shared {
    fn mark_unhealthy(&self, reason: &str) {
        if !self.unhealthy.swap(true, Ordering::SeqCst) {
            warn!(reason, "Browser session marked unhealthy");
        }
        self.tracking.lock().unwrap().last_unhealthy_reason = Some(reason.to_string());
    }

    fn touch(&self, busy: bool) {
        let mut tracking = self.tracking.lock().unwrap();
        tracking.busy = busy;
        tracking.last_activity = Some(Utc::now());
    }
}

/// Owns the single automation surface and hands it out one holder at a time.
pub struct BrowserSessionManager {
    slot: Arc<Mutex<Slot>>,
    factory: Arc<dyn SurfaceFactory>,
    shared: Arc<Shared>,
    acquire_timeout: Duration,
    audit: Option<AuditHandle>,
}

impl BrowserSessionManager {
    pub fn new(factory: Arc<dyn SurfaceFactory>, acquire_timeout: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            factory,
            shared: Arc::new(Shared {
                unhealthy: AtomicBool::new(false),
                tracking: StdMutex::new(Tracking::default()),
            }),
            acquire_timeout,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Wait for exclusive use of the session, launching or relaunching the
    /// surface first when it is absent or unhealthy.
    ///
    /// Waiters are served in arrival order. The wait is bounded by the
    /// configured acquire timeout.
    pub async fn acquire(&self) -> Result<SessionHandle, SessionError> {
        let guard = tokio::time::timeout(self.acquire_timeout, Arc::clone(&self.slot).lock_owned())
            .await
            .map_err(|_| SessionError::AcquireTimeout(self.acquire_timeout))?;

        let mut handle = SessionHandle {
            guard,
            shared: Arc::clone(&self.shared),
        };
        self.ensure_surface(&mut handle.guard).await?;
        self.shared.touch(true);
        debug!("Browser session acquired");
        Ok(handle)
    }

    /// Release the session. Equivalent to dropping the handle.
    pub fn release(&self, handle: SessionHandle) {
        drop(handle);
    }

    /// Flag the session for recreation on the next acquire.
    pub fn mark_unhealthy(&self, reason: &str) {
        self.shared.mark_unhealthy(reason);
    }

    /// Launch the surface ahead of the first cycle.
    pub async fn warm_up(&self) -> Result<(), SessionError> {
        let handle = self.acquire().await?;
        drop(handle);
        info!("Browser session ready");
        Ok(())
    }

    /// Read the library size from the surface under the session lock.
    ///
    /// A failed read keeps the previous stats.
    pub async fn refresh_library_stats(&self) -> Result<LibraryStats, LibraryStatsError> {
        let mut handle = self.acquire().await?;
        let read = tokio::time::timeout(self.acquire_timeout, handle.surface()?.library_stats())
            .await
            .unwrap_or_else(|_| {
                Err(SurfaceError::Timeout(format!(
                    "library stats after {:?}",
                    self.acquire_timeout
                )))
            });
        let stats = match read {
            Ok(stats) => stats,
            Err(e) => {
                if matches!(e, SurfaceError::Disconnected(_) | SurfaceError::Cdp(_)) {
                    handle.mark_unhealthy(&e.to_string());
                }
                warn!(error = %e, "Library stats refresh failed");
                return Err(e.into());
            }
        };
        drop(handle);

        info!(
            torrents = stats.torrents,
            total_size_tb = stats.total_size_tb,
            "Library stats refreshed"
        );
        metrics::LIBRARY_TORRENTS.set(stats.torrents as i64);
        metrics::LIBRARY_SIZE_TB.set(stats.total_size_tb);
        self.shared.tracking.lock().unwrap().library_stats = Some(stats.clone());
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::LibraryStatsRefreshed {
                    torrents: stats.torrents,
                    total_size_tb: stats.total_size_tb,
                })
                .await;
        }
        Ok(stats)
    }

    /// Stats from the last successful refresh.
    pub fn library_stats(&self) -> Option<LibraryStats> {
        self.shared.tracking.lock().unwrap().library_stats.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let tracking = self.shared.tracking.lock().unwrap();
        let unhealthy = self.shared.unhealthy.load(Ordering::SeqCst);
        let state = if unhealthy {
            SessionState::Unhealthy
        } else if !tracking.present {
            SessionState::Absent
        } else if tracking.busy {
            SessionState::Busy
        } else {
            SessionState::Idle
        };

        SessionStatus {
            state,
            healthy: !unhealthy,
            launches: tracking.launches,
            restart_count: tracking.restart_count,
            last_activity: tracking.last_activity,
            last_unhealthy_reason: tracking.last_unhealthy_reason.clone(),
        }
    }

    /// Tear the surface down, waiting (bounded) for the current holder.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let mut guard = tokio::time::timeout(self.acquire_timeout, self.slot.lock())
            .await
            .map_err(|_| SessionError::AcquireTimeout(self.acquire_timeout))?;

        if let Some(mut surface) = guard.take() {
            info!(surface = surface.name(), "Shutting down browser session");
            if let Err(e) = surface.shutdown().await {
                warn!(error = %e, "Browser session did not shut down cleanly");
            }
        }
        self.shared.tracking.lock().unwrap().present = false;
        Ok(())
    }

    async fn ensure_surface(&self, slot: &mut Slot) -> Result<(), SessionError> {
        let mut reason = if self.shared.unhealthy.load(Ordering::SeqCst) {
            self.shared.tracking.lock().unwrap().last_unhealthy_reason.clone()
        } else {
            None
        };

        match slot.as_mut() {
            Some(surface) if reason.is_none() => {
                if surface.is_alive().await {
                    return Ok(());
                }
                reason = Some("liveness probe failed".to_string());
            }
            _ => {}
        }

        if let Some(mut old) = slot.take() {
            debug!(surface = old.name(), "Tearing down previous surface");
            if let Err(e) = old.shutdown().await {
                warn!(error = %e, "Previous surface did not shut down cleanly");
            }
            self.shared.tracking.lock().unwrap().present = false;
        }

        let surface = tokio::time::timeout(self.acquire_timeout, self.factory.launch())
            .await
            .map_err(|_| SessionError::AcquireTimeout(self.acquire_timeout))?
            .map_err(SessionError::Launch)?;
        info!(factory = self.factory.name(), "Launched automation surface");
        *slot = Some(surface);
        self.shared.unhealthy.store(false, Ordering::SeqCst);

        let restart_count = {
            let mut tracking = self.shared.tracking.lock().unwrap();
            tracking.present = true;
            tracking.launches += 1;
            if tracking.launches > 1 {
                tracking.restart_count += 1;
                Some(tracking.restart_count)
            } else {
                None
            }
        };

        if let Some(restart_count) = restart_count {
            metrics::SESSION_RESTARTS.inc();
            if let Some(ref audit) = self.audit {
                audit.try_emit(AuditEvent::SessionRestarted {
                    restart_count,
                    reason: reason.unwrap_or_else(|| "surface absent".to_string()),
                });
            }
        }
        Ok(())
    }
}

/// Exclusive use of the automation surface. Dropping it releases the session.
pub struct SessionHandle {
    guard: OwnedMutexGuard<Slot>,
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn surface(&mut self) -> Result<&mut Box<dyn AutomationSurface>, SessionError> {
        self.guard.as_mut().ok_or(SessionError::Closed)
    }

    /// Flag the session for recreation once this handle is released.
    pub fn mark_unhealthy(&self, reason: &str) {
        self.shared.mark_unhealthy(reason);
    }

    pub fn is_unhealthy(&self) -> bool {
        self.shared.unhealthy.load(Ordering::SeqCst)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shared.touch(false);
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("unhealthy", &self.is_unhealthy())
            .finish_non_exhaustive()
    }
}
