use crate::auth::create_channel_token;
use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use huddle_protocol::{TokenResponse, Uid};
use serde::Deserialize;
use serde_json::Value;

const MISSING_FIELDS: &str = "channelName and uid are required";

/// Request body as sent by clients. Fields are optional so that a missing
/// value produces the service's own error message instead of a serde one.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenRequest {
    channel_name: Option<String>,
    uid: Option<Value>,
}

/// Accepts a JSON number or a numeric string. Zero counts as absent.
fn parse_uid(raw: &Value) -> Option<Uid> {
    let uid = match raw {
        Value::Number(n) => n.as_u64().and_then(|n| Uid::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<Uid>().ok(),
        _ => None,
    }?;

    (uid != 0).then_some(uid)
}

pub async fn issue_token(
    State(state): State<AppState>,
    payload: std::result::Result<Json<IssueTokenRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>> {
    let Json(input) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let channel_name = input.channel_name.filter(|c| !c.is_empty());
    let uid = input.uid.as_ref().and_then(parse_uid);

    let (Some(channel_name), Some(uid)) = (channel_name, uid) else {
        return Err(AppError::BadRequest(MISSING_FIELDS.to_string()));
    };

    let (token, expires_at) = create_channel_token(
        &state.config.app_id,
        &state.config.app_certificate,
        &channel_name,
        uid,
        state.config.token_expire_seconds,
    )?;

    tracing::debug!(channel = %channel_name, uid, expires_at, "Issued channel token");

    Ok(Json(TokenResponse {
        token,
        expires_at: Some(expires_at),
    }))
}
