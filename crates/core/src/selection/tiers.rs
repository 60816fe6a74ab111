use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named quality tier; candidates whose title matches `pattern` belong to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityTier {
    pub name: String,
    pub pattern: String,
}

impl QualityTier {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
        }
    }
}

pub fn default_tiers() -> Vec<QualityTier> {
    vec![
        QualityTier::new("1080p", r"1080p"),
        QualityTier::new("2160p", r"2160p|\b4k\b|\buhd\b"),
        QualityTier::new("720p", r"720p"),
        QualityTier::new("any", r".*"),
    ]
}

pub fn default_exclude_pattern() -> Option<String> {
    Some(r"\b(cam|camrip|hdcam|ts|telesync|hdts|tc|telecine|screener|scr)\b".to_string())
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("invalid pattern for quality tier '{name}': {reason}")]
    InvalidTier { name: String, reason: String },

    #[error("invalid exclude pattern: {0}")]
    InvalidExclude(String),

    #[error("no quality tiers configured")]
    NoTiers,
}

/// Quality tiers and the exclusion pattern, compiled. Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct TierList {
    tiers: Vec<(String, Regex)>,
    exclude: Option<Regex>,
}

fn compile_pattern(pattern: &str) -> Result<Regex, regex_lite::Error> {
    Regex::new(&format!("(?i){}", pattern))
}

impl TierList {
    pub fn compile(tiers: &[QualityTier], exclude: Option<&str>) -> Result<Self, SelectionError> {
        if tiers.is_empty() {
            return Err(SelectionError::NoTiers);
        }

        let tiers = tiers
            .iter()
            .map(|tier| {
                compile_pattern(&tier.pattern)
                    .map(|re| (tier.name.clone(), re))
                    .map_err(|e| SelectionError::InvalidTier {
                        name: tier.name.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let exclude = exclude
            .filter(|p| !p.trim().is_empty())
            .map(|p| compile_pattern(p).map_err(|e| SelectionError::InvalidExclude(e.to_string())))
            .transpose()?;

        Ok(Self { tiers, exclude })
    }

    pub fn is_excluded(&self, title: &str) -> bool {
        self.exclude.as_ref().is_some_and(|re| re.is_match(title))
    }

    /// Index of the first tier the title matches.
    pub fn tier_of(&self, title: &str) -> Option<usize> {
        self.tiers.iter().position(|(_, re)| re.is_match(title))
    }

    pub fn matches(&self, tier: usize, title: &str) -> bool {
        self.tiers
            .get(tier)
            .is_some_and(|(_, re)| re.is_match(title))
    }

    pub fn name(&self, tier: usize) -> Option<&str> {
        self.tiers.get(tier).map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}
