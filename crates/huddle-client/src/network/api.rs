use huddle_protocol::ErrorResponse;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};

use super::CredentialError;

pub async fn post<T: DeserializeOwned, B: Serialize>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
) -> Result<T, CredentialError> {
    let response = client.post(url).json(body).send().await?;

    let status = response.status();
    let bytes = response.bytes().await?;

    decode(status, &bytes)
}

/// Interpret a service response: `{ "error": .. }` bodies on failure,
/// the expected payload on success.
pub(crate) fn decode<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, CredentialError> {
    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorResponse>(body)
            .map(|e| e.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());

        return Err(CredentialError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_slice(body).map_err(|e| CredentialError::Malformed(e.to_string()))
}
