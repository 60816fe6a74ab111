//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of every external seam (the
//! automation surface, its factory, the request source, the token endpoint
//! and credential persistence), so the scheduler can be exercised end to end
//! without a browser or network.
//!
//! # Example
//!
//! ```rust,ignore
//! use seerrbridge_core::testing::{fixtures, MockRequestSource, MockSurfaceFactory, ScriptedSurface};
//!
//! let surface = ScriptedSurface::new();
//! surface.set_results(vec![fixtures::candidate(0, "Arrival.2016.1080p", 8.0, true)]).await;
//! let factory = MockSurfaceFactory::new(surface.clone());
//!
//! let source = MockRequestSource::new();
//! source.add_request(fixtures::movie_request("1", "Arrival", 2016)).await;
//! ```

mod mock_credentials;
mod mock_source;
mod mock_surface;

pub use mock_credentials::{MemoryCredentialPersistence, MockTokenEndpoint};
pub use mock_source::MockRequestSource;
pub use mock_surface::{MockSurfaceFactory, ScriptedSurface, SurfaceCall, SurfaceStep};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{Duration, Utc};

    use crate::credential::Credential;
    use crate::request::{MediaIds, ObservedRequest};
    use crate::surface::SearchCandidate;

    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    /// A credential valid for `valid_for`.
    pub fn credential(valid_for: Duration) -> Credential {
        Credential {
            access_token: "initial-access".to_string(),
            expiry: Utc::now() + valid_for,
            refresh_token: "initial-refresh".to_string(),
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
        }
    }

    /// A search candidate of `gb` gigabytes.
    pub fn candidate(index: usize, title: &str, gb: f64, cached: bool) -> SearchCandidate {
        SearchCandidate {
            index,
            title: title.to_string(),
            size_bytes: (gb * GIB) as u64,
            file_count: None,
            cached,
            in_library: false,
        }
    }

    /// A movie request with ids filled in.
    pub fn movie_request(id: &str, title: &str, year: i32) -> ObservedRequest {
        ObservedRequest::movie(id, title, Some(year)).with_ids(MediaIds {
            tmdb_id: Some(1000 + year as u64),
            imdb_id: Some(format!("tt{:07}", year)),
            source_media_id: id.parse().ok(),
        })
    }

    /// A show request for the given seasons with ids filled in.
    pub fn show_request(id: &str, title: &str, year: i32, seasons: Vec<u32>) -> ObservedRequest {
        ObservedRequest::show(id, title, Some(year), seasons).with_ids(MediaIds {
            tmdb_id: Some(2000 + year as u64),
            imdb_id: Some(format!("tt{:07}", year + 1)),
            source_media_id: id.parse().ok(),
        })
    }
}
