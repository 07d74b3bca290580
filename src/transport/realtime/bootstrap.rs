// Ephemeral credential fetch.
//
// The credential is scoped to one session: fetched immediately before
// negotiation, held in memory only, discarded on stop.

use serde::Deserialize;
use tracing::info;

use crate::error::CaptureError;

#[derive(Debug, Deserialize)]
struct SessionBootstrap {
    client_secret: ClientSecret,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
}

/// Fetch a short-lived credential from the session-bootstrap endpoint.
///
/// Failure here fails the whole start operation.
pub async fn fetch_ephemeral_credential(
    client: &reqwest::Client,
    bootstrap_url: &str,
) -> Result<String, CaptureError> {
    let url = format!("{}/session", bootstrap_url.trim_end_matches('/'));
    info!("Fetching ephemeral credential");

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(CaptureError::NegotiationFailed(format!(
            "bootstrap endpoint returned {}",
            response.status()
        )));
    }

    let body: SessionBootstrap = response
        .json()
        .await
        .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;

    if body.client_secret.value.is_empty() {
        return Err(CaptureError::NegotiationFailed(
            "bootstrap endpoint returned an empty client secret".to_string(),
        ));
    }

    Ok(body.client_secret.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_body_shape() {
        let body: SessionBootstrap =
            serde_json::from_str(r#"{"client_secret":{"value":"ek_abc123"}}"#).unwrap();
        assert_eq!(body.client_secret.value, "ek_abc123");
    }

    #[test]
    fn test_bootstrap_body_missing_secret_fails() {
        let parsed = serde_json::from_str::<SessionBootstrap>(r#"{"expires_at":0}"#);
        assert!(parsed.is_err());
    }
}
