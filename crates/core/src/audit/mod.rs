//! Append-only trail of request, unit, credential and scheduler events.

mod events;
mod handle;
mod sqlite;
mod store;
mod writer;

pub use events::{AuditEvent, AuditRecord, UnitRef};
pub use handle::AuditHandle;
pub use sqlite::SqliteAuditStore;
pub use store::{AuditError, AuditQuery, AuditStore, Page};
pub use writer::{create_audit_system, AuditWriter};
