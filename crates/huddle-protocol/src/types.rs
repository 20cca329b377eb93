use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Numeric identity of a channel member, unique for the duration of a session
pub type Uid = u32;

/// Default lifetime of an access token when the service does not say otherwise
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown media kind: {0}")]
pub struct ParseMediaKindError(pub String);

impl FromStr for MediaKind {
    type Err = ParseMediaKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(MediaKind::Audio),
            "video" => Ok(MediaKind::Video),
            other => Err(ParseMediaKindError(other.to_string())),
        }
    }
}

/// Short-lived, channel-and-identity-scoped authorization to join a channel.
///
/// Fetched fresh for every join attempt and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: i64,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: i64) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Expiry as seconds since the Unix epoch
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expires_at, 0).single()
    }

    pub fn is_expired_at(&self, now_epoch_secs: i64) -> bool {
        now_epoch_secs >= self.expires_at
    }
}

/// Body of `POST /api/token`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub channel_name: String,
    pub uid: Uid,
}

/// Successful response of `POST /api/token`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Error body returned by the credential service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_request_uses_camel_case_keys() {
        let body = serde_json::to_value(TokenRequest {
            channel_name: "room-1".to_string(),
            uid: 42,
        })
        .unwrap();

        assert_eq!(body, serde_json::json!({ "channelName": "room-1", "uid": 42 }));
    }

    #[test]
    fn token_response_without_expiry_parses() {
        let response: TokenResponse = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(response.token, "abc");
        assert_eq!(response.expires_at, None);
    }

    #[test]
    fn media_kind_parses_lowercase_names() {
        assert_eq!("audio".parse::<MediaKind>(), Ok(MediaKind::Audio));
        assert_eq!("video".parse::<MediaKind>(), Ok(MediaKind::Video));
        assert!("screen".parse::<MediaKind>().is_err());
    }

    #[test]
    fn access_token_expiry() {
        let token = AccessToken::new("abc", 1_000);
        assert!(!token.is_expired_at(999));
        assert!(token.is_expired_at(1_000));
        assert_eq!(token.expires_at_utc().map(|t| t.timestamp()), Some(1_000));
    }
}
