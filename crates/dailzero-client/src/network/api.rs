use crate::error::{CallError, Result};
use serde::{Serialize, de::DeserializeOwned};

/// POST a JSON body and parse a JSON response.
///
/// Non-success responses are mapped to [`CallError::Credential`] so callers
/// see the HTTP status alongside whatever message the backend supplied.
pub async fn post_json<T: DeserializeOwned, B: Serialize>(url: &str, body: &B) -> Result<T> {
    let client = reqwest::Client::new();
    let response = client.post(url).json(body).send().await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        return Err(CallError::Credential {
            status,
            details: extract_details(&text),
        });
    }

    Ok(response.json().await?)
}

/// POST an SDP offer as `application/sdp` and read the answer as text.
pub async fn post_sdp(url: &str, token: &str, offer: &str) -> Result<String> {
    let client = reqwest::Client::new();
    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/sdp")
        .body(offer.to_string())
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(CallError::Signaling { status, body });
    }

    Ok(response.text().await?)
}

/// Pull a human-readable message out of an error body.
///
/// The backend wraps failures as `{"details": "..."}` or `{"error": "..."}`;
/// anything else is passed through verbatim.
fn extract_details(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(details) = value.get("details").and_then(|v| v.as_str()) {
            return details.to_string();
        }
        if let Some(error) = value.get("error").and_then(|v| v.as_str()) {
            return error.to_string();
        }
    }
    body.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_details_field() {
        let body = r#"{"details":"Failed to create session: quota exceeded"}"#;
        assert_eq!(
            extract_details(body),
            "Failed to create session: quota exceeded"
        );
    }

    #[test]
    fn falls_back_to_error_field() {
        let body = r#"{"error":"Internal server error"}"#;
        assert_eq!(extract_details(body), "Internal server error");
    }

    #[test]
    fn passes_through_non_json() {
        assert_eq!(extract_details("Bad Gateway"), "Bad Gateway");
        assert_eq!(extract_details(""), "");
    }
}
