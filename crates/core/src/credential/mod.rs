//! Provider credential lifecycle.
//!
//! The access token is refreshed proactively once it enters the configured
//! margin. A refreshed pair is written to disk before the refresh is reported
//! as successful.

mod persistence;
mod real_debrid;
mod store;
mod types;

pub use persistence::{CredentialPersistence, JsonFileCredentialPersistence};
pub use real_debrid::RealDebridTokenEndpoint;
pub use store::{CredentialStore, TokenEndpoint};
pub use types::{Credential, CredentialError, CredentialStatus, TokenGrant};
