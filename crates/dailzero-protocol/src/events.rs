use serde::{Deserialize, Serialize};

/// Label of the data channel carrying protocol events
pub const EVENTS_CHANNEL_LABEL: &str = "oai-events";

/// Literal token the agent embeds in generated speech to request hangup
///
/// A control signal, never user-visible text; the reducer strips it from
/// the finalized utterance and schedules call termination.
pub const END_CALL_SENTINEL: &str = "<END_CALL>";

/// Transcription model requested in the session configuration
pub const TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Realtime model used when none is configured
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

/// SDP exchange endpoint of the realtime speech provider
pub const DEFAULT_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";

/// Events received from the provider on the data channel
///
/// Only the types the session manager acts on are modeled; everything
/// else the provider sends is treated as a diagnostics-only event by the
/// reducer. Extra fields on recognized events are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Partial text of the in-flight AI utterance
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { delta: String },

    /// The AI utterance is complete; flush the accumulated text
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        transcript: Option<String>,
    },

    /// Server-side transcription of a finished user turn
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    /// The remote turn is fully complete
    #[serde(rename = "response.done")]
    ResponseDone,

    /// Server VAD detected the start of user speech
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    /// Server VAD detected the end of user speech
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    /// Remote audio began rendering on the output buffer
    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioStarted,

    /// Remote audio finished rendering
    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioStopped,

    /// Protocol-level error from the provider
    #[serde(rename = "error")]
    Error { error: ErrorDetail },
}

/// Payload of a provider `error` event
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorDetail {
    /// Best-effort human-readable message
    pub fn display(&self) -> &str {
        self.message.as_deref().unwrap_or("unknown realtime error")
    }
}

/// Control messages this client sends on the data channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Configure transcription and server-side turn detection
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Ask the agent to produce a response (used for the opening greeting)
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseConfig },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub input_audio_transcription: TranscriptionConfig,
    pub turn_detection: TurnDetection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
}

impl ClientEvent {
    /// The session configuration sent once the data channel opens
    pub fn configure_session() -> Self {
        ClientEvent::SessionUpdate {
            session: SessionConfig {
                input_audio_transcription: TranscriptionConfig {
                    model: TRANSCRIPTION_MODEL.to_string(),
                },
                turn_detection: TurnDetection {
                    mode: "server_vad".to_string(),
                },
            },
        }
    }

    /// A response request carrying the greeting as instructions
    pub fn greeting(instructions: impl Into<String>) -> Self {
        ClientEvent::ResponseCreate {
            response: ResponseConfig {
                modalities: vec!["audio".to_string(), "text".to_string()],
                instructions: instructions.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transcript_delta() {
        let raw = r#"{"type":"response.audio_transcript.delta","response_id":"resp_1","item_id":"item_1","output_index":0,"content_index":0,"delta":"Hel"}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        match event {
            ServerEvent::AudioTranscriptDelta { delta } => assert_eq!(delta, "Hel"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn parses_unit_events_with_extra_fields() {
        let raw = r#"{"type":"response.done","response":{"id":"resp_1","status":"completed"}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, ServerEvent::ResponseDone));

        let raw = r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":120,"item_id":"item_2"}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, ServerEvent::SpeechStarted));

        let raw = r#"{"type":"output_audio_buffer.started","response_id":"resp_3"}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, ServerEvent::OutputAudioStarted));
    }

    #[test]
    fn parses_error_event_message() {
        let raw = r#"{"type":"error","error":{"type":"invalid_request_error","code":"bad_session","message":"session expired"}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        match event {
            ServerEvent::Error { error } => assert_eq!(error.display(), "session expired"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unrecognized_type_is_a_parse_error() {
        let raw = r#"{"type":"session.created","session":{"id":"sess_1"}}"#;
        assert!(serde_json::from_str::<ServerEvent>(raw).is_err());
    }

    #[test]
    fn session_update_wire_shape() {
        let json = serde_json::to_value(ClientEvent::configure_session()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "session.update",
                "session": {
                    "input_audio_transcription": { "model": "whisper-1" },
                    "turn_detection": { "type": "server_vad" }
                }
            })
        );
    }

    #[test]
    fn greeting_wire_shape() {
        let json = serde_json::to_value(ClientEvent::greeting("Hello, thanks for calling!")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "response.create",
                "response": {
                    "modalities": ["audio", "text"],
                    "instructions": "Hello, thanks for calling!"
                }
            })
        );
    }
}
