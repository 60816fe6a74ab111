//! Request and unit types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of media a request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    Show,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Show => "show",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "movie" => Some(MediaKind::Movie),
            "show" | "tv" => Some(MediaKind::Show),
            _ => None,
        }
    }
}

/// External identifiers carried by a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmdb_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imdb_id: Option<String>,
    /// The request source's own media record id (used to mark availability).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_media_id: Option<u64>,
}

/// A request as seen by the request source, before it is merged into the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedRequest {
    pub id: String,
    pub kind: MediaKind,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub ids: MediaIds,
    /// Requested seasons (shows only; ignored for movies).
    #[serde(default)]
    pub seasons: Vec<u32>,
    pub observed_at: DateTime<Utc>,
}

impl ObservedRequest {
    /// Movie request observed now.
    pub fn movie(id: impl Into<String>, title: impl Into<String>, year: Option<i32>) -> Self {
        Self {
            id: id.into(),
            kind: MediaKind::Movie,
            title: title.into(),
            year,
            ids: MediaIds::default(),
            seasons: Vec::new(),
            observed_at: Utc::now(),
        }
    }

    /// Show request for the given seasons observed now.
    pub fn show(
        id: impl Into<String>,
        title: impl Into<String>,
        year: Option<i32>,
        seasons: Vec<u32>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: MediaKind::Show,
            title: title.into(),
            year,
            ids: MediaIds::default(),
            seasons,
            observed_at: Utc::now(),
        }
    }

    pub fn with_ids(mut self, ids: MediaIds) -> Self {
        self.ids = ids;
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }

    /// Season keys for the units this request expands to.
    pub fn unit_seasons(&self) -> Vec<Option<u32>> {
        match self.kind {
            MediaKind::Movie => vec![None],
            MediaKind::Show => {
                let mut seasons = self.seasons.clone();
                seasons.sort_unstable();
                seasons.dedup();
                seasons.into_iter().map(Some).collect()
            }
        }
    }
}

/// Processing state of one unit (a movie, or one season of a show).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnitState {
    /// Waiting to be processed.
    Pending,

    /// Currently being processed by the engine.
    InProgress { started_at: DateTime<Utc> },

    /// Failed transiently; eligible again after `retry_after`.
    RetryPending {
        retry_after: DateTime<Utc>,
        reason: String,
    },

    /// Fetched (or already present) on the provider.
    Completed {
        completed_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        candidate: Option<String>,
    },

    /// Given up; only a manual resubmit leaves this state.
    Failed {
        failed_at: DateTime<Utc>,
        reason: String,
    },
}

impl UnitState {
    /// Returns the state type as a string (matches the serde tag).
    pub fn state_type(&self) -> &'static str {
        match self {
            UnitState::Pending => "pending",
            UnitState::InProgress { .. } => "in_progress",
            UnitState::RetryPending { .. } => "retry_pending",
            UnitState::Completed { .. } => "completed",
            UnitState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Completed { .. } | UnitState::Failed { .. })
    }

    /// Whether a cycle running at `now` may pick this unit up.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self {
            UnitState::Pending => true,
            UnitState::RetryPending { retry_after, .. } => *retry_after <= now,
            _ => false,
        }
    }
}

/// All state type tags, in lifecycle order.
pub const UNIT_STATE_TYPES: [&str; 5] = [
    "pending",
    "in_progress",
    "retry_pending",
    "completed",
    "failed",
];

/// One independently tracked unit of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestUnit {
    /// Season number; `None` for movies.
    pub season: Option<u32>,
    pub state: UnitState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// A stored request with all of its units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRequest {
    pub id: String,
    pub kind: MediaKind,
    pub title: String,
    pub year: Option<i32>,
    pub ids: MediaIds,
    pub first_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub units: Vec<RequestUnit>,
}

impl MediaRequest {
    pub fn unit(&self, season: Option<u32>) -> Option<&RequestUnit> {
        self.units.iter().find(|u| u.season == season)
    }

    /// True when every unit has completed.
    pub fn is_fully_completed(&self) -> bool {
        !self.units.is_empty()
            && self
                .units
                .iter()
                .all(|u| matches!(u.state, UnitState::Completed { .. }))
    }

    /// Human-readable label, e.g. "Severance (2022) S02".
    pub fn label(&self, season: Option<u32>) -> String {
        unit_label(&self.title, self.year, season)
    }
}

pub(crate) fn unit_label(title: &str, year: Option<i32>, season: Option<u32>) -> String {
    let mut label = title.to_string();
    if let Some(year) = year {
        label.push_str(&format!(" ({})", year));
    }
    if let Some(season) = season {
        label.push_str(&format!(" S{:02}", season));
    }
    label
}

/// A unit handed to the engine: the parent's metadata plus the season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub request_id: String,
    pub kind: MediaKind,
    pub title: String,
    pub year: Option<i32>,
    pub ids: MediaIds,
    pub season: Option<u32>,
    pub attempts: u32,
}

impl WorkUnit {
    pub fn label(&self) -> String {
        unit_label(&self.title, self.year, self.season)
    }
}

/// Position in the eligible sequence; resuming after it never revisits a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EligibleCursor {
    pub(crate) first_seen_ms: i64,
    pub(crate) seq: i64,
    pub(crate) season_ord: i64,
}

/// An eligible unit with its position in the sequence.
#[derive(Debug, Clone)]
pub struct EligibleUnit {
    pub unit: WorkUnit,
    pub cursor: EligibleCursor,
}

/// Result of merging an observed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First observation; the record and its units were created.
    Created,
    /// Already known; nothing changed.
    Unchanged,
    /// Already known; these newly requested seasons were added as pending units.
    SeasonsAdded(Vec<u32>),
}

/// Classified result of one processing attempt, as recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Completed { candidate: Option<String> },
    Retryable { reason: String },
    Permanent { reason: String },
    /// Credentials are unusable; release the unit without consuming an attempt.
    AuthPaused,
}

impl UnitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitOutcome::Completed { .. } => "completed",
            UnitOutcome::Retryable { .. } => "retryable",
            UnitOutcome::Permanent { .. } => "permanent",
            UnitOutcome::AuthPaused => "auth_paused",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_state_serialization_tag() {
        let state = UnitState::RetryPending {
            retry_after: Utc::now(),
            reason: "ready-marker-timeout".to_string(),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"type\":\"retry_pending\""));
        let parsed: UnitState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.state_type(), "retry_pending");
    }

    #[test]
    fn test_terminal_states() {
        let now = Utc::now();
        assert!(!UnitState::Pending.is_terminal());
        assert!(!UnitState::InProgress { started_at: now }.is_terminal());
        assert!(UnitState::Completed {
            completed_at: now,
            candidate: None
        }
        .is_terminal());
        assert!(UnitState::Failed {
            failed_at: now,
            reason: "no-match".into()
        }
        .is_terminal());
    }

    #[test]
    fn test_retry_pending_eligible_only_after_delay() {
        let now = Utc::now();
        let state = UnitState::RetryPending {
            retry_after: now + Duration::seconds(60),
            reason: "x".into(),
        };
        assert!(!state.is_eligible(now));
        assert!(state.is_eligible(now + Duration::seconds(61)));
    }

    #[test]
    fn test_unit_seasons_sorted_and_deduplicated() {
        let show = ObservedRequest::show("1", "Severance", Some(2022), vec![2, 1, 2]);
        assert_eq!(show.unit_seasons(), vec![Some(1), Some(2)]);

        let movie = ObservedRequest::movie("2", "Heat", Some(1995));
        assert_eq!(movie.unit_seasons(), vec![None]);
    }

    #[test]
    fn test_label() {
        assert_eq!(unit_label("Severance", Some(2022), Some(2)), "Severance (2022) S02");
        assert_eq!(unit_label("Heat", None, None), "Heat");
    }
}
