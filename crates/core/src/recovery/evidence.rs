//! On-disk store for failure snapshots.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("evidence I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceEntry {
    /// File name inside the evidence directory.
    pub file: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    pub captured_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl EvidenceEntry {
    fn file_name(request_id: &str, season: Option<u32>, captured_at: DateTime<Utc>) -> String {
        let season = match season {
            Some(season) => format!("s{:02}", season),
            None => "movie".to_string(),
        };
        let request_id: String = request_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        format!(
            "{}_{}_{}.png",
            captured_at.format(TIMESTAMP_FORMAT),
            season,
            request_id
        )
    }

    /// Inverse of `file_name`; `None` for files this store did not write.
    fn parse(file: &str, size_bytes: u64) -> Option<Self> {
        let stem = file.strip_suffix(".png")?;
        let mut parts = stem.splitn(3, '_');
        let timestamp = parts.next()?;
        let season = parts.next()?;
        let request_id = parts.next()?;

        let captured_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .ok()?
            .and_utc();
        let season = match season {
            "movie" => None,
            s => Some(s.strip_prefix('s')?.parse().ok()?),
        };

        Some(Self {
            file: file.to_string(),
            request_id: request_id.to_string(),
            season,
            captured_at,
            size_bytes,
        })
    }
}

/// Keeps the most recent snapshots in a directory and deletes older ones.
pub struct EvidenceStore {
    dir: PathBuf,
    retain: usize,
    /// Oldest first.
    entries: Mutex<Vec<EvidenceEntry>>,
}

impl EvidenceStore {
    /// Open (creating if needed) an evidence directory, picking up snapshots
    /// left by earlier runs.
    pub async fn open(dir: impl Into<PathBuf>, retain: usize) -> Result<Self, EvidenceError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(item) = read_dir.next_entry().await? {
            let name = item.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let size = item.metadata().await.map(|m| m.len()).unwrap_or(0);
            if let Some(entry) = EvidenceEntry::parse(name, size) {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then(a.file.cmp(&b.file)));
        debug!(dir = %dir.display(), count = entries.len(), "Opened evidence store");

        let store = Self {
            dir,
            retain,
            entries: Mutex::new(entries),
        };
        store.prune(&mut *store.entries.lock().await).await;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a snapshot and drop the oldest ones beyond the retention count.
    pub async fn store(
        &self,
        request_id: &str,
        season: Option<u32>,
        png: &[u8],
    ) -> Result<EvidenceEntry, EvidenceError> {
        let mut entries = self.entries.lock().await;

        let mut captured_at = Utc::now();
        // File names are unique per millisecond.
        if let Some(last) = entries.last() {
            if captured_at <= last.captured_at {
                captured_at = last.captured_at + chrono::Duration::milliseconds(1);
            }
        }

        let file = EvidenceEntry::file_name(request_id, season, captured_at);
        tokio::fs::write(self.dir.join(&file), png).await?;

        let entry = EvidenceEntry {
            file,
            request_id: request_id.to_string(),
            season,
            captured_at,
            size_bytes: png.len() as u64,
        };
        entries.push(entry.clone());
        self.prune(&mut entries).await;
        Ok(entry)
    }

    /// Stored snapshots, newest first.
    pub async fn recent(&self) -> Vec<EvidenceEntry> {
        self.entries.lock().await.iter().rev().cloned().collect()
    }

    async fn prune(&self, entries: &mut Vec<EvidenceEntry>) {
        if entries.len() <= self.retain {
            return;
        }
        let excess = entries.len() - self.retain;
        for old in entries.drain(..excess) {
            if let Err(e) = tokio::fs::remove_file(self.dir.join(&old.file)).await {
                warn!(file = %old.file, error = %e, "Failed to delete old evidence");
            }
        }
    }
}
