use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Request lifecycle
    RequestObserved {
        request_id: String,
        kind: String,
        title: String,
        /// Number of units created for the request.
        units: u32,
    },
    SeasonsAdded {
        request_id: String,
        seasons: Vec<u32>,
    },
    UnitStateChanged {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        season: Option<u32>,
        from_state: String,
        to_state: String,
        attempts: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    UnitResubmitted {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        season: Option<u32>,
        previous_state: String,
    },
    CandidateSelected {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        season: Option<u32>,
        title: String,
        tier: String,
        cached: bool,
    },
    RequestMarkedAvailable {
        request_id: String,
    },
    EvidenceCaptured {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        season: Option<u32>,
        file: String,
    },

    // Credential events
    TokenRefreshed {
        expiry: DateTime<Utc>,
    },
    TokenRefreshFailed {
        reason: String,
    },

    // Session events
    SessionRestarted {
        restart_count: u64,
        reason: String,
    },
    LibraryStatsRefreshed {
        torrents: u64,
        total_size_tb: f64,
    },

    // Scheduler events
    CycleCompleted {
        trigger: String,
        processed: u32,
        completed: u32,
        retried: u32,
        failed: u32,
        auth_paused: bool,
        duration_ms: u64,
    },
    SchedulerPaused {
        reason: String,
    },
    SchedulerResumed,
}

/// The request (and season, for shows) an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitRef<'a> {
    pub request_id: &'a str,
    pub season: Option<u32>,
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::RequestObserved { .. } => "request_observed",
            Self::SeasonsAdded { .. } => "seasons_added",
            Self::UnitStateChanged { .. } => "unit_state_changed",
            Self::UnitResubmitted { .. } => "unit_resubmitted",
            Self::CandidateSelected { .. } => "candidate_selected",
            Self::RequestMarkedAvailable { .. } => "request_marked_available",
            Self::EvidenceCaptured { .. } => "evidence_captured",
            Self::TokenRefreshed { .. } => "token_refreshed",
            Self::TokenRefreshFailed { .. } => "token_refresh_failed",
            Self::SessionRestarted { .. } => "session_restarted",
            Self::LibraryStatsRefreshed { .. } => "library_stats_refreshed",
            Self::CycleCompleted { .. } => "cycle_completed",
            Self::SchedulerPaused { .. } => "scheduler_paused",
            Self::SchedulerResumed => "scheduler_resumed",
        }
    }

    /// The unit this event concerns. Request-wide events carry no season.
    pub fn unit(&self) -> Option<UnitRef<'_>> {
        let (request_id, season) = match self {
            Self::UnitStateChanged {
                request_id, season, ..
            }
            | Self::UnitResubmitted {
                request_id, season, ..
            }
            | Self::CandidateSelected {
                request_id, season, ..
            }
            | Self::EvidenceCaptured {
                request_id, season, ..
            } => (request_id, *season),
            Self::RequestObserved { request_id, .. }
            | Self::SeasonsAdded { request_id, .. }
            | Self::RequestMarkedAvailable { request_id } => (request_id, None),
            _ => return None,
        };
        Some(UnitRef {
            request_id: request_id.as_str(),
            season,
        })
    }

    /// State a unit landed in, for transition events.
    pub fn outcome(&self) -> Option<&str> {
        match self {
            Self::UnitStateChanged { to_state, .. } => Some(to_state),
            Self::UnitResubmitted { .. } => Some("pending"),
            _ => None,
        }
    }
}

/// A stored audit record with the columns it is indexed by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    pub data: AuditEvent,
}

impl AuditRecord {
    /// An unsaved record for `event`; the store assigns the id.
    pub fn new(event: AuditEvent, timestamp: DateTime<Utc>) -> Self {
        let unit = event.unit();
        Self {
            id: 0,
            timestamp,
            event_type: event.event_type().to_string(),
            request_id: unit.map(|u| u.request_id.to_string()),
            season: unit.and_then(|u| u.season),
            outcome: event.outcome().map(str::to_string),
            data: event,
        }
    }
}
