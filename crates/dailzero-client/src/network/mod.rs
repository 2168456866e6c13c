mod api;

use crate::error::{CallError, Result};
use dailzero_protocol::{TokenRequest, TokenResponse};

/// Client for the DailZero backend that mints ephemeral realtime credentials.
///
/// The backend holds the provider API key; this client only ever sees the
/// short-lived token it hands back.
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub async fn fetch_token(
        &self,
        model: &str,
        business_id: Option<&str>,
    ) -> Result<TokenResponse> {
        let request = TokenRequest {
            model: model.to_string(),
            business_id: business_id.map(str::to_string),
        };

        let response: TokenResponse = api::post_json(
            &format!("{}/api/realtime/session", self.base_url),
            &request,
        )
        .await?;

        if response.token.is_empty() {
            return Err(CallError::MissingCredential);
        }

        Ok(response)
    }
}

/// Client for the realtime provider's SDP exchange endpoint
#[derive(Clone)]
pub struct RealtimeApi {
    base_url: String,
}

impl RealtimeApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Exchange a local SDP offer for the provider's answer.
    ///
    /// The ephemeral token goes in the Authorization header, never in the
    /// URL, so it stays out of proxy and server logs.
    pub async fn exchange_sdp(&self, token: &str, model: &str, offer: &str) -> Result<String> {
        let url = format!("{}?model={}", self.base_url, model);
        api::post_sdp(&url, token, offer).await
    }
}
