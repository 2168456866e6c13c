use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Credential request failed with status {status}: {details}")]
    Credential { status: u16, details: String },

    #[error("Backend returned an empty session token")]
    MissingCredential,

    #[error("SDP exchange failed with status {status}: {body}")]
    Signaling { status: u16, body: String },

    #[error("No active call")]
    NotConnected,

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Audio error: {0}")]
    Audio(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CallError>;
