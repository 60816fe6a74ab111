//! Recovery: per-attempt time limit, outcome classification, retry policy
//! and failure evidence.

mod controller;
mod evidence;
mod policy;

pub use controller::{classify, AttemptReport, Disposition, RecoveryController, ATTEMPT_TIMEOUT};
pub use evidence::{EvidenceEntry, EvidenceError, EvidenceStore};
pub use policy::RetryPolicy;
