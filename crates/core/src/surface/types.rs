//! Automation surface types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::{MediaKind, WorkUnit};

/// What to look up on the automation surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTarget {
    pub kind: MediaKind,
    pub title: String,
    pub year: Option<i32>,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<u64>,
    /// Season for shows.
    pub season: Option<u32>,
}

impl From<&WorkUnit> for SearchTarget {
    fn from(unit: &WorkUnit) -> Self {
        Self {
            kind: unit.kind,
            title: unit.title.clone(),
            year: unit.year,
            imdb_id: unit.ids.imdb_id.clone(),
            tmdb_id: unit.ids.tmdb_id,
            season: unit.season,
        }
    }
}

impl SearchTarget {
    /// Free-text query used when no external id is available.
    pub fn query(&self) -> String {
        match self.year {
            Some(year) => format!("{} {}", self.title, year),
            None => self.title.clone(),
        }
    }
}

/// One search result, fresh per attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCandidate {
    /// Position on the surface; used to act on the result.
    pub index: usize,
    pub title: String,
    pub size_bytes: u64,
    /// Number of files, when the surface reports it.
    #[serde(default)]
    pub file_count: Option<u32>,
    /// The provider already has the content ready for instant delivery.
    #[serde(default)]
    pub cached: bool,
    /// The content is already in the account's library.
    #[serde(default)]
    pub in_library: bool,
}

impl SearchCandidate {
    /// Average size per file; the whole size when the count is unknown.
    pub fn per_file_bytes(&self) -> u64 {
        match self.file_count {
            Some(count) if count > 1 => self.size_bytes / u64::from(count),
            _ => self.size_bytes,
        }
    }
}

/// Size of the account's debrid library, as shown on its library page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub torrents: u64,
    pub total_size_tb: f64,
    pub refreshed_at: DateTime<Utc>,
}

/// Errors reported by an automation surface.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("failed to launch automation surface: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("element not found: {0}")]
    ElementMissing(String),

    #[error("script failed: {0}")]
    Script(String),

    #[error("automation surface disconnected: {0}")]
    Disconnected(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Cdp(#[from] chromiumoxide::error::CdpError),
}
