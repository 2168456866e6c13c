//! Call session state
//!
//! Pure container for one call's observable state: the protocol-driven
//! call state, the advisory VAD hint, the live and finalized transcripts,
//! and the diagnostics log. The manager folds reducer effects into it and
//! forwards the returned events; nothing here touches a device or a
//! socket, which keeps the whole lifecycle testable.

use super::reducer::Effect;
use chrono::{DateTime, Utc};
use dailzero_protocol::{CallState, LogEntry, TranscriptEntry, VadHint};
use uuid::Uuid;

/// Notifications emitted as the session changes
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Protocol-driven call state changed
    StateChanged(CallState),
    /// Advisory local VAD hint changed
    VadHint(VadHint),
    /// A diagnostics record was added
    Log(LogEntry),
    /// An utterance was finalized into the live transcript
    TranscriptUpdated(TranscriptEntry),
}

#[derive(Debug, Default)]
pub struct CallSession {
    id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    state: CallState,
    vad_hint: VadHint,
    /// Transcript of the call in progress
    live: Vec<TranscriptEntry>,
    /// Transcript of the last finished call
    conversation: Vec<TranscriptEntry>,
    logs: Vec<LogEntry>,
}

impl CallSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh call, clearing per-call state from the previous one.
    pub fn begin(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.id = Some(id);
        self.started_at = Some(Utc::now());
        self.state = CallState::Connecting;
        self.vad_hint = VadHint::Idle;
        self.live.clear();
        self.logs.clear();
        id
    }

    /// Set the protocol state. Returns an event only when it changed.
    pub fn set_state(&mut self, state: CallState) -> Option<CallEvent> {
        if self.state == state {
            return None;
        }
        self.state = state;
        Some(CallEvent::StateChanged(state))
    }

    /// Set the advisory VAD hint. Returns an event only when it changed.
    ///
    /// The hint never feeds back into [`set_state`]; the remote protocol
    /// stays the authoritative turn-taking source.
    pub fn set_vad_hint(&mut self, hint: VadHint) -> Option<CallEvent> {
        if self.vad_hint == hint {
            return None;
        }
        self.vad_hint = hint;
        Some(CallEvent::VadHint(hint))
    }

    pub fn append_transcript(&mut self, entry: TranscriptEntry) -> CallEvent {
        self.live.push(entry.clone());
        CallEvent::TranscriptUpdated(entry)
    }

    pub fn append_log(&mut self, entry: LogEntry) -> CallEvent {
        self.logs.push(entry.clone());
        CallEvent::Log(entry)
    }

    /// Fold one reducer effect into the session.
    ///
    /// Hangup scheduling is the manager's job; it is inert here so the
    /// fold stays total.
    pub fn apply(&mut self, effect: Effect) -> Option<CallEvent> {
        match effect {
            Effect::SetState(state) => self.set_state(state),
            Effect::AppendTranscript(entry) => Some(self.append_transcript(entry)),
            Effect::Log(entry) => Some(self.append_log(entry)),
            Effect::ScheduleHangup(_) => None,
        }
    }

    /// Flush the live transcript into the finalized conversation and
    /// return it. Safe to call repeatedly; only the first call after
    /// [`begin`] moves anything.
    pub fn finish(&mut self) -> Vec<TranscriptEntry> {
        if self.id.take().is_some() {
            self.conversation = std::mem::take(&mut self.live);
        }
        self.state = CallState::Idle;
        self.vad_hint = VadHint::Idle;
        self.conversation.clone()
    }

    /// Drop both transcripts and the log.
    pub fn clear(&mut self) {
        self.live.clear();
        self.conversation.clear();
        self.logs.clear();
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn vad_hint(&self) -> VadHint {
        self.vad_hint
    }

    pub fn live(&self) -> Vec<TranscriptEntry> {
        self.live.clone()
    }

    pub fn conversation(&self) -> Vec<TranscriptEntry> {
        self.conversation.clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.clone()
    }
}
