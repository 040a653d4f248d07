//! Upstream bearer-credential acquisition.
//!
//! Tokens are short-lived and their remaining validity cannot be assumed
//! across connections, so every session acquires a fresh token; nothing is
//! cached or pooled.

use async_trait::async_trait;
use scribe_core::errors::RelayError;
use serde::Deserialize;
use tracing::debug;

/// Source of upstream bearer credentials, one per session.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Acquire a fresh bearer token. Treated as idempotent and retryable
    /// by callers; implementations must not cache across calls.
    async fn bearer_token(&self) -> Result<String, RelayError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Client-credentials token source against the vendor's OAuth endpoint.
pub struct HttpTokenSource {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpTokenSource {
    /// Create a source for the given token endpoint and credentials.
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn bearer_token(&self) -> Result<String, RelayError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RelayError::TokenAcquisition(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::TokenAcquisition(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|e| RelayError::TokenAcquisition(format!("malformed token response: {e}")))?;
        if payload.access_token.is_empty() {
            return Err(RelayError::TokenAcquisition(
                "token endpoint returned an empty token".into(),
            ));
        }
        debug!("acquired upstream bearer token");
        Ok(payload.access_token)
    }
}

/// Fixed-token source for tests and local development against a
/// pre-provisioned environment.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Wrap an existing bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn bearer_token(&self) -> Result<String, RelayError> {
        Ok(self.token.clone())
    }
}
