use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session state of a realtime call
///
/// Driven by the lifecycle controller and the remote protocol events.
/// Exactly one value is active at a time; `Error` is terminal until a
/// new call is started.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Listening,
    Processing,
    Speaking,
    Error,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Listening => "listening",
            CallState::Processing => "processing",
            CallState::Speaking => "speaking",
            CallState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Advisory turn hint produced by the local voice activity detector
///
/// Kept separate from [`CallState`] so the local VAD and the remote
/// protocol never fight over one field; the remote protocol is the
/// authoritative turn-taking source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VadHint {
    /// No call in progress
    #[default]
    Idle,
    /// Local speech detected or between turns
    Listening,
    /// Local silence just detected, brief "thinking" feedback
    Processing,
}

impl fmt::Display for VadHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VadHint::Idle => "idle",
            VadHint::Listening => "listening",
            VadHint::Processing => "processing",
        };
        write!(f, "{}", name)
    }
}

/// Speaker attribution for a transcript entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Ai => write!(f, "ai"),
        }
    }
}

/// One finalized utterance of the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn now(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Category of a diagnostics record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    User,
    Ai,
    System,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogCategory::User => write!(f, "user"),
            LogCategory::Ai => write!(f, "ai"),
            LogCategory::System => write!(f, "system"),
        }
    }
}

/// Diagnostics record surfaced to the embedding application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub category: LogCategory,
    pub message: String,
    pub duration_ms: Option<u64>,
}

impl LogEntry {
    pub fn system(message: impl Into<String>) -> Self {
        Self {
            category: LogCategory::System,
            message: message.into(),
            duration_ms: None,
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self {
            category: LogCategory::User,
            message: message.into(),
            duration_ms: None,
        }
    }

    pub fn ai(message: impl Into<String>) -> Self {
        Self {
            category: LogCategory::Ai,
            message: message.into(),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Request body for the backend's ephemeral credential endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_id: Option<String>,
}

/// Response body from the backend's ephemeral credential endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Short-lived token authorizing the client-to-provider SDP exchange
    pub token: String,
    /// Optional greeting the agent should open the call with
    #[serde(default)]
    pub first_message: Option<String>,
    /// Whether the backend applied a stored per-tenant configuration
    #[serde(default)]
    pub used_config: Option<bool>,
    /// Settings the backend applied when minting the credential
    #[serde(default)]
    pub applied: Option<AppliedConfig>,
}

/// Per-tenant settings echoed back by the credential endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppliedConfig {
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub transcription_model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}
