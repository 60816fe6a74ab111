//! Candidate selection: size ceilings, exclusions and ordered quality tiers.

mod ranking;
mod tiers;

pub use ranking::{Selection, Selector, SizeCeilings};
pub use tiers::{default_exclude_pattern, default_tiers, QualityTier, SelectionError, TierList};
