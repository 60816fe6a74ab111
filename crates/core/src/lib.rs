pub mod audit;
pub mod config;
pub mod credential;
pub mod engine;
pub mod metrics;
pub mod recovery;
pub mod request;
pub mod scheduler;
pub mod selection;
pub mod session;
pub mod source;
pub mod surface;
pub mod testing;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditHandle, AuditQuery, AuditRecord,
    AuditStore, AuditWriter, Page, SqliteAuditStore,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use credential::{
    Credential, CredentialError, CredentialPersistence, CredentialStatus, CredentialStore,
    JsonFileCredentialPersistence, RealDebridTokenEndpoint, TokenEndpoint, TokenGrant,
};
pub use engine::{EngineOutcome, SelectionEngine};
pub use recovery::{
    Disposition, EvidenceEntry, EvidenceError, EvidenceStore, RecoveryController, RetryPolicy,
};
pub use request::{
    MediaKind, MediaRequest, ObservedRequest, RequestFilter, RequestStore, RequestStoreError,
    SqliteRequestStore, UnitOutcome, UnitState, WorkUnit,
};
pub use scheduler::{
    CycleOutcome, CycleReport, Scheduler, SchedulerError, SchedulerStatus, SkipReason,
    TriggerAck, TriggerSource,
};
pub use selection::{QualityTier, Selection, SelectionError, Selector};
pub use session::{
    BrowserSessionManager, LibraryStatsError, SessionError, SessionHandle, SessionStatus,
};
pub use source::{OverseerrClient, RequestSource, SourceError};
pub use surface::{
    AutomationSurface, ChromiumSurfaceFactory, LibraryStats, SearchCandidate, SearchTarget,
    SurfaceError, SurfaceFactory,
};
