use crate::error::Result;
use chrono::Utc;
use huddle_protocol::Uid;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Publisher,
    Subscriber,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelClaims {
    pub app_id: String,
    pub channel: String,
    pub uid: Uid,
    pub role: Role,
    pub iat: i64, // Issued at
    pub exp: i64, // Privilege expiry
}

impl ChannelClaims {
    pub fn new(app_id: &str, channel: &str, uid: Uid, role: Role, expires_in_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            app_id: app_id.to_string(),
            channel: channel.to_string(),
            uid,
            role,
            iat: now,
            exp: now + expires_in_secs,
        }
    }
}

/// Mint a publisher token for `uid` in `channel`. Returns the token and its expiry.
pub fn create_channel_token(
    app_id: &str,
    certificate: &str,
    channel: &str,
    uid: Uid,
    expires_in_secs: i64,
) -> Result<(String, i64)> {
    let claims = ChannelClaims::new(app_id, channel, uid, Role::Publisher, expires_in_secs);

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(certificate.as_bytes()),
    )?;

    Ok((token, claims.exp))
}

pub fn verify_channel_token(token: &str, certificate: &str) -> Result<ChannelClaims> {
    let token_data = decode::<ChannelClaims>(
        token,
        &DecodingKey::from_secret(certificate.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}
