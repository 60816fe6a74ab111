use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, warn};

use super::{AuditEvent, AuditRecord};
use crate::metrics;

/// Sender side of the audit trail.
///
/// Clones share one bounded channel to the [`AuditWriter`](super::AuditWriter).
/// Events are stamped when emitted, not when written. Emitting never fails
/// the caller.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditHandle {
    pub(crate) fn new(tx: mpsc::Sender<AuditRecord>) -> Self {
        Self { tx }
    }

    /// Emit an event, waiting for channel capacity.
    pub async fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.tx.send(AuditRecord::new(event, Utc::now())).await {
            metrics::AUDIT_EVENTS_DROPPED.inc();
            error!(event_type = %e.0.event_type, "Audit writer gone, event lost");
        }
    }

    /// Emit without waiting. Returns false when the event was dropped.
    ///
    /// For callers holding a std mutex.
    pub fn try_emit(&self, event: AuditEvent) -> bool {
        let record = AuditRecord::new(event, Utc::now());
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(record)) => {
                metrics::AUDIT_EVENTS_DROPPED.inc();
                warn!(event_type = %record.event_type, "Audit channel full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                metrics::AUDIT_EVENTS_DROPPED.inc();
                error!(event_type = %record.event_type, "Audit writer gone, event lost");
                false
            }
        }
    }
}
