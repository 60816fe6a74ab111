//! Credential types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest access token lifetime accepted from a grant.
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 30 * 24 * 60 * 60;

/// Provider OAuth credential, in its persisted shape.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub expiry: DateTime<Utc>,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Credential {
    /// True once the access token must not be used anymore.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// True when less than `margin` of validity remains.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expiry - now <= margin
    }

    /// The credential that results from applying a token grant at `now`.
    ///
    /// The lifetime is clamped to [`MAX_TOKEN_LIFETIME_SECS`].
    pub fn with_grant(&self, grant: TokenGrant, now: DateTime<Utc>) -> Credential {
        let lifetime = Duration::try_seconds(grant.expires_in.min(MAX_TOKEN_LIFETIME_SECS) as i64)
            .unwrap_or_else(Duration::zero);
        Credential {
            access_token: grant.access_token,
            expiry: now.checked_add_signed(lifetime).unwrap_or(now),
            refresh_token: grant.refresh_token,
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expiry", &self.expiry)
            .field("refresh_token", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// New token pair returned by the token endpoint.
#[derive(Clone, PartialEq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: u64,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of the credential store, safe to expose.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub expiry: DateTime<Utc>,
    pub expired: bool,
    pub needs_refresh: bool,
    /// A refreshed credential is held in memory but not yet persisted.
    pub persist_pending: bool,
    pub last_refresh: Option<DateTime<Utc>>,
    pub refresh_count: u64,
}

/// Errors that can occur in the credential store.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The provider rejected the refresh, or it could not be performed.
    #[error("authorization failure: {0}")]
    AuthFailure(String),

    /// A refreshed credential could not be written to disk.
    #[error("failed to persist credential: {0}")]
    Persist(String),

    /// The stored credential could not be read at startup.
    #[error("failed to load credential: {0}")]
    Load(String),
}

impl CredentialError {
    /// Whether automation must pause until a refresh succeeds.
    pub fn pauses_automation(&self) -> bool {
        matches!(
            self,
            CredentialError::AuthFailure(_) | CredentialError::Persist(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expiry: DateTime<Utc>) -> Credential {
        Credential {
            access_token: "access".into(),
            expiry,
            refresh_token: "refresh".into(),
            client_id: "client".into(),
            client_secret: "secret".into(),
        }
    }

    #[test]
    fn test_persisted_shape_is_camel_case() {
        let json = serde_json::to_value(credential(Utc::now())).unwrap();
        assert!(json.get("accessToken").is_some());
        assert!(json.get("refreshToken").is_some());
        assert!(json.get("clientId").is_some());
        assert!(json.get("clientSecret").is_some());
        assert!(json.get("expiry").is_some());
    }

    #[test]
    fn test_needs_refresh_within_margin() {
        let now = Utc::now();
        let margin = Duration::minutes(10);
        assert!(credential(now + Duration::minutes(5)).needs_refresh(now, margin));
        assert!(!credential(now + Duration::hours(1)).needs_refresh(now, margin));
        assert!(credential(now - Duration::seconds(1)).is_expired(now));
    }

    #[test]
    fn test_with_grant_keeps_client_identity() {
        let now = Utc::now();
        let next = credential(now).with_grant(
            TokenGrant {
                access_token: "new-access".into(),
                refresh_token: "new-refresh".into(),
                expires_in: 3600,
            },
            now,
        );
        assert_eq!(next.access_token, "new-access");
        assert_eq!(next.refresh_token, "new-refresh");
        assert_eq!(next.client_id, "client");
        assert_eq!(next.expiry, now + Duration::seconds(3600));
    }

    #[test]
    fn test_with_grant_clamps_oversized_lifetime() {
        let now = Utc::now();
        let next = credential(now).with_grant(
            TokenGrant {
                access_token: "new-access".into(),
                refresh_token: "new-refresh".into(),
                expires_in: u64::MAX,
            },
            now,
        );
        assert_eq!(next.refresh_token, "new-refresh");
        assert_eq!(
            next.expiry,
            now + Duration::seconds(MAX_TOKEN_LIFETIME_SECS as i64)
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", credential(Utc::now()));
        assert!(!debug.contains("secret\""));
        assert!(!debug.contains("\"access\""));
        assert!(debug.contains("<redacted>"));
    }
}
