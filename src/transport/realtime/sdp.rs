// Offer/answer exchange with the negotiation endpoint.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::info;

use crate::error::CaptureError;

/// Negotiation endpoint for a given model
pub fn negotiation_url(base_url: &str, model: &str) -> String {
    format!("{}?model={}", base_url.trim_end_matches('/'), model)
}

/// Send the local offer, returning the remote answer SDP.
///
/// The credential authorizes exactly this exchange; the body is the raw
/// offer text with `application/sdp` content type.
pub async fn negotiate(
    client: &reqwest::Client,
    base_url: &str,
    model: &str,
    credential: &str,
    offer_sdp: &str,
) -> Result<String, CaptureError> {
    let url = negotiation_url(base_url, model);
    info!("Negotiating realtime session: {}", url);

    let response = client
        .post(&url)
        .header(AUTHORIZATION, format!("Bearer {credential}"))
        .header(CONTENT_TYPE, "application/sdp")
        .body(offer_sdp.to_owned())
        .send()
        .await
        .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        return Err(CaptureError::NegotiationFailed(format!(
            "negotiation endpoint returned {status}: {detail}"
        )));
    }

    let answer = response
        .text()
        .await
        .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;

    if answer.trim().is_empty() {
        return Err(CaptureError::NegotiationFailed(
            "negotiation endpoint returned an empty answer".to_string(),
        ));
    }

    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_url_appends_model() {
        assert_eq!(
            negotiation_url("https://api.example.com/v1/realtime", "scribe-1"),
            "https://api.example.com/v1/realtime?model=scribe-1"
        );
        // Trailing slash normalized
        assert_eq!(
            negotiation_url("https://api.example.com/v1/realtime/", "scribe-1"),
            "https://api.example.com/v1/realtime?model=scribe-1"
        );
    }
}
