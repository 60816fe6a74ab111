//! Candidate filtering and tier ranking.

use tracing::debug;

use super::{SelectionError, TierList};
use crate::config::SelectionConfig;
use crate::request::MediaKind;
use crate::surface::SearchCandidate;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Per-kind size ceilings. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeCeilings {
    pub movie_bytes: Option<u64>,
    /// Applied to the per-file average for shows.
    pub episode_bytes: Option<u64>,
}

fn gb_to_bytes(gb: f64) -> Option<u64> {
    (gb > 0.0).then(|| (gb * GIB) as u64)
}

impl SizeCeilings {
    pub fn from_gb(movie_gb: f64, episode_gb: f64) -> Self {
        Self {
            movie_bytes: gb_to_bytes(movie_gb),
            episode_bytes: gb_to_bytes(episode_gb),
        }
    }

    pub fn allows(&self, kind: MediaKind, candidate: &SearchCandidate) -> bool {
        match kind {
            MediaKind::Movie => self
                .movie_bytes
                .map_or(true, |max| candidate.size_bytes <= max),
            MediaKind::Show => self
                .episode_bytes
                .map_or(true, |max| candidate.per_file_bytes() <= max),
        }
    }
}

/// Result of choosing among candidates.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// A surviving candidate is already in the library.
    InLibrary(SearchCandidate),
    Chosen {
        candidate: SearchCandidate,
        tier: String,
    },
    NoMatch {
        found: usize,
        excluded: usize,
    },
}

/// Applies size ceilings, the exclusion pattern and tier ranking.
#[derive(Debug, Clone)]
pub struct Selector {
    tiers: TierList,
    ceilings: SizeCeilings,
}

impl Selector {
    pub fn new(tiers: TierList, ceilings: SizeCeilings) -> Self {
        Self { tiers, ceilings }
    }

    pub fn from_config(config: &SelectionConfig) -> Result<Self, SelectionError> {
        let tiers = TierList::compile(&config.tiers, config.exclude_pattern.as_deref())?;
        Ok(Self::new(
            tiers,
            SizeCeilings::from_gb(config.max_movie_size_gb, config.max_episode_size_gb),
        ))
    }

    pub fn ceilings(&self) -> SizeCeilings {
        self.ceilings
    }

    /// Candidates that pass the size ceiling and the exclusion pattern, in surface order.
    pub fn eligible(&self, kind: MediaKind, candidates: Vec<SearchCandidate>) -> Vec<SearchCandidate> {
        candidates
            .into_iter()
            .filter(|c| self.ceilings.allows(kind, c))
            .filter(|c| !self.tiers.is_excluded(&c.title))
            .collect()
    }

    /// The best candidate: the first tier matching anything wins, cached
    /// beats non-cached inside it, and ties keep surface order.
    pub fn rank<'a>(&self, candidates: &'a [SearchCandidate]) -> Option<(&'a SearchCandidate, &str)> {
        for tier in 0..self.tiers.len() {
            let mut in_tier = candidates
                .iter()
                .filter(|c| self.tiers.matches(tier, &c.title))
                .peekable();
            let first = match in_tier.peek() {
                Some(first) => *first,
                None => continue,
            };
            let best = in_tier.find(|c| c.cached).unwrap_or(first);
            return self.tiers.name(tier).map(|name| (best, name));
        }
        None
    }

    pub fn select(&self, kind: MediaKind, candidates: Vec<SearchCandidate>) -> Selection {
        let found = candidates.len();
        let eligible = self.eligible(kind, candidates);
        let excluded = found - eligible.len();

        if let Some(present) = eligible.iter().find(|c| c.in_library) {
            return Selection::InLibrary(present.clone());
        }

        match self.rank(&eligible) {
            Some((candidate, tier)) => {
                debug!(title = %candidate.title, tier, cached = candidate.cached, "Selected candidate");
                Selection::Chosen {
                    candidate: candidate.clone(),
                    tier: tier.to_string(),
                }
            }
            None => Selection::NoMatch { found, excluded },
        }
    }
}
