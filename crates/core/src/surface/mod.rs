//! Automation surface over the debrid web UI.

mod chromium;
mod traits;
mod types;

pub use chromium::{ChromiumSurface, ChromiumSurfaceFactory};
pub use traits::{AutomationSurface, SurfaceFactory};
pub use types::{LibraryStats, SearchCandidate, SearchTarget, SurfaceError};
