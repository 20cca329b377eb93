mod api;

use async_trait::async_trait;
use chrono::Utc;
use huddle_protocol::{AccessToken, TokenRequest, TokenResponse, Uid, DEFAULT_TOKEN_TTL_SECS};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("invalid credential request: {0}")]
    InvalidInput(String),

    #[error("credential service unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("credential service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed credential response: {0}")]
    Malformed(String),

    #[error("credential request timed out after {0:?}")]
    Timeout(Duration),
}

/// Source of channel access tokens
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Request a fresh token for `uid` in `channel`. No retries, no caching.
    async fn fetch_token(&self, channel: &str, uid: Uid) -> Result<AccessToken, CredentialError>;
}

/// HTTP client for the credential service's `POST /api/token`
#[derive(Debug, Clone)]
pub struct CredentialClient {
    http: reqwest::Client,
    server_url: String,
}

impl CredentialClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), server_url)
    }

    pub fn with_client(http: reqwest::Client, server_url: impl Into<String>) -> Self {
        Self {
            http,
            server_url: server_url.into(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn token_url(&self) -> String {
        format!("{}/api/token", self.server_url.trim_end_matches('/'))
    }
}

fn into_access_token(response: TokenResponse) -> Result<AccessToken, CredentialError> {
    if response.token.is_empty() {
        return Err(CredentialError::Malformed("empty token".to_string()));
    }

    let expires_at = response
        .expires_at
        .unwrap_or_else(|| Utc::now().timestamp() + DEFAULT_TOKEN_TTL_SECS);

    Ok(AccessToken::new(response.token, expires_at))
}

#[async_trait]
impl CredentialProvider for CredentialClient {
    async fn fetch_token(&self, channel: &str, uid: Uid) -> Result<AccessToken, CredentialError> {
        if channel.is_empty() {
            return Err(CredentialError::InvalidInput("channel name is empty".to_string()));
        }

        let request = TokenRequest {
            channel_name: channel.to_string(),
            uid,
        };

        let response: TokenResponse = api::post(&self.http, &self.token_url(), &request).await?;
        let token = into_access_token(response)?;

        tracing::debug!(channel, uid, expires_at = ?token.expires_at_utc(), "Fetched access token");
        Ok(token)
    }
}
