//! Real-Debrid OAuth token endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{Credential, CredentialError, TokenEndpoint, TokenGrant};
use crate::config::CredentialsConfig;

/// Grant type Real-Debrid expects when exchanging a refresh token for an
/// open-source app's device credentials.
const DEVICE_GRANT_TYPE: &str = "http://oauth.net/grant_type/device/1.0";

/// Exchanges refresh tokens against the Real-Debrid token endpoint.
pub struct RealDebridTokenEndpoint {
    client: Client,
    token_url: String,
}

impl RealDebridTokenEndpoint {
    pub fn new(config: &CredentialsConfig) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CredentialError::AuthFailure(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            token_url: config.token_url.clone(),
        })
    }
}

#[async_trait]
impl TokenEndpoint for RealDebridTokenEndpoint {
    fn name(&self) -> &str {
        "real-debrid"
    }

    async fn exchange(&self, credential: &Credential) -> Result<TokenGrant, CredentialError> {
        debug!(url = %self.token_url, "Exchanging refresh token");

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", credential.client_id.as_str()),
                ("client_secret", credential.client_secret.as_str()),
                ("code", credential.refresh_token.as_str()),
                ("grant_type", DEVICE_GRANT_TYPE),
            ])
            .send()
            .await
            .map_err(|e| CredentialError::AuthFailure(format!("token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::AuthFailure(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| CredentialError::AuthFailure(format!("invalid token response: {}", e)))
    }
}
