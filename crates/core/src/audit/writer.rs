use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::{AuditHandle, AuditRecord, AuditStore};
use crate::metrics;

/// Most records written in one transaction.
const MAX_BATCH: usize = 64;

/// Drains the audit channel into the store.
///
/// Whatever is queued when the writer wakes is written as one batch, so a
/// burst of unit transitions costs a single transaction.
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditRecord>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    /// Run until every [`AuditHandle`] is dropped and the queue is empty.
    pub async fn run(mut self) {
        info!("Audit writer started");
        let mut batch = Vec::with_capacity(MAX_BATCH);

        while self.rx.recv_many(&mut batch, MAX_BATCH).await > 0 {
            match self.store.append(&batch) {
                Ok(()) => debug!(count = batch.len(), "Audit records written"),
                Err(e) => {
                    metrics::AUDIT_EVENTS_DROPPED.inc_by(batch.len() as u64);
                    error!(count = batch.len(), error = %e, "Failed to write audit records");
                }
            }
            batch.clear();
        }

        info!("Audit writer stopped");
    }
}

/// Build the audit channel.
///
/// Spawn the writer with `tokio::spawn(writer.run())` and clone the handle
/// into every component that records events.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter { rx, store })
}
