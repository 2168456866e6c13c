//! Protocol event reducer
//!
//! Folds the provider's data-channel events into effects: state changes,
//! transcript appends, log records, and scheduled hangups. The single
//! consuming task executes effects in order, which keeps the transcript
//! in arrival order even when the provider finalizes a user turn after
//! the agent has already started answering.

use dailzero_protocol::{
    CallState, END_CALL_SENTINEL, ErrorDetail, LogEntry, Role, ServerEvent, TranscriptEntry,
};
use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

/// Delay between the hangup sentinel and actually ending the call, so
/// trailing agent audio can finish rendering.
pub const HANGUP_GRACE: Duration = Duration::from_millis(1500);

static RE_END_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\s*{}\s*", regex::escape(END_CALL_SENTINEL))).unwrap()
});

/// Side effects requested by the reducer
#[derive(Debug, Clone)]
pub enum Effect {
    SetState(CallState),
    AppendTranscript(TranscriptEntry),
    Log(LogEntry),
    ScheduleHangup(Duration),
}

/// Stateful fold over the provider's event stream
pub struct EventReducer {
    /// Accumulated text of the in-flight AI utterance
    partial_response: String,
    /// When the first delta of the current response arrived
    response_started: Option<Instant>,
}

impl EventReducer {
    pub fn new() -> Self {
        Self {
            partial_response: String::new(),
            response_started: None,
        }
    }

    /// Process one raw data-channel message and return its effects.
    pub fn apply(&mut self, raw: &str) -> Vec<Effect> {
        let event: ServerEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(_) => {
                log_unmodeled(raw);
                return Vec::new();
            }
        };

        match event {
            ServerEvent::AudioTranscriptDelta { delta } => {
                if self.partial_response.is_empty() {
                    self.response_started = Some(Instant::now());
                }
                self.partial_response.push_str(&delta);
                Vec::new()
            }
            ServerEvent::AudioTranscriptDone { transcript } => self.finish_response(transcript),
            ServerEvent::InputTranscriptionCompleted { transcript } => {
                let text = transcript.trim();
                if text.is_empty() {
                    return Vec::new();
                }
                vec![
                    Effect::AppendTranscript(TranscriptEntry::now(Role::User, text)),
                    Effect::Log(LogEntry::user(text)),
                ]
            }
            ServerEvent::ResponseDone => vec![Effect::SetState(CallState::Listening)],
            ServerEvent::SpeechStarted => vec![Effect::SetState(CallState::Listening)],
            ServerEvent::SpeechStopped => vec![Effect::SetState(CallState::Processing)],
            ServerEvent::OutputAudioStarted => vec![Effect::SetState(CallState::Speaking)],
            ServerEvent::OutputAudioStopped => vec![Effect::SetState(CallState::Listening)],
            ServerEvent::Error { error } => error_effects(&error),
        }
    }

    /// Finalize the accumulated AI utterance.
    ///
    /// The accumulator is authoritative; the `transcript` field of the
    /// done event is only a fallback for responses whose deltas never
    /// arrived. The hangup sentinel is stripped before the text lands in
    /// the transcript.
    fn finish_response(&mut self, fallback: Option<String>) -> Vec<Effect> {
        let started = self.response_started.take();
        let accumulated = std::mem::take(&mut self.partial_response);
        let raw_text = if accumulated.is_empty() {
            fallback.unwrap_or_default()
        } else {
            accumulated
        };

        let wants_hangup = raw_text.contains(END_CALL_SENTINEL);
        let text = if wants_hangup {
            RE_END_CALL.replace_all(&raw_text, " ").trim().to_string()
        } else {
            raw_text.trim().to_string()
        };

        let mut effects = Vec::new();
        if !text.is_empty() {
            effects.push(Effect::AppendTranscript(TranscriptEntry::now(Role::Ai, &text)));
            let mut log = LogEntry::ai(&text);
            if let Some(started) = started {
                log = log.with_duration(started.elapsed().as_millis() as u64);
            }
            effects.push(Effect::Log(log));
        }
        if wants_hangup {
            effects.push(Effect::Log(LogEntry::system("Agent requested end of call")));
            effects.push(Effect::ScheduleHangup(HANGUP_GRACE));
        }
        effects
    }
}

impl Default for EventReducer {
    fn default() -> Self {
        Self::new()
    }
}

fn error_effects(error: &ErrorDetail) -> Vec<Effect> {
    tracing::error!("Realtime error: {}", error.display());
    vec![
        Effect::Log(LogEntry::system(format!(
            "Realtime error: {}",
            error.display()
        ))),
        Effect::SetState(CallState::Error),
    ]
}

/// Diagnostics for events outside the modeled set.
fn log_unmodeled(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => {
            let kind = value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("<missing type>");
            tracing::debug!("Ignoring realtime event {:?}", kind);
        }
        Err(e) => tracing::warn!("Unparseable data channel frame: {}", e),
    }
}
