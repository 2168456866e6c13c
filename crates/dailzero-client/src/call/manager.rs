//! Call lifecycle controller
//!
//! Drives a call end to end: microphone capture, credential fetch, SDP
//! exchange, the reducer task that folds protocol events into session
//! state, and the idempotent teardown path. All observable changes flow
//! out as [`CallEvent`]s on the channel returned by [`CallManager::new`].

use crate::call::reducer::{Effect, EventReducer};
use crate::call::session::{CallEvent, CallSession};
use crate::call::transport::{RealtimeTransport, TransportEvent};
use crate::error::{CallError, Result};
use crate::network::{BackendClient, RealtimeApi};
use chrono::Utc;
use dailzero_media::{
    AudioAnalyzer, AudioCapture, AudioEncoder, AudioPlayback, CaptureConfig, ENCODE_BITRATE,
    ENCODE_FRAME_SIZE, VAD_TICK, VadTransition, VoiceActivityDetector,
};
use dailzero_protocol::{
    CallState, ClientEvent, DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_URL, LogEntry,
    TranscriptEntry, VadHint,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

/// Connection configuration for a call manager
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Base URL of the DailZero backend that mints session credentials
    pub backend_url: String,
    /// SDP exchange endpoint of the realtime provider
    pub realtime_url: String,
    /// Realtime model requested when a call has no override
    pub model: String,
    /// Tenant whose stored agent configuration the backend should apply
    pub business_id: Option<String>,
    /// Input device name, None for the system default
    pub input_device: Option<String>,
    /// Output device name, None for the system default
    pub output_device: Option<String>,
    /// ICE server URLs for the peer connection
    pub ice_servers: Vec<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:3000".to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            business_id: None,
            input_device: None,
            output_device: None,
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

/// Per-call overrides for [`CallManager::start_call`]
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub model: Option<String>,
    pub business_id: Option<String>,
}

/// Manages one realtime voice call at a time
#[derive(Clone)]
pub struct CallManager {
    config: CallConfig,
    backend: BackendClient,
    realtime: RealtimeApi,
    transport: RealtimeTransport,
    session: Arc<Mutex<CallSession>>,
    events_tx: mpsc::UnboundedSender<CallEvent>,
    /// Shared between the capture pump (writer) and the VAD tick (reader)
    analyzer: Arc<Mutex<Option<AudioAnalyzer>>>,
    capture: Arc<RwLock<Option<AudioCapture>>>,
    playback: Arc<RwLock<Option<AudioPlayback>>>,
    /// Greeting from the credential response, sent once on channel open
    greeting: Arc<RwLock<Option<String>>>,
    tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
    hangup: Arc<RwLock<Option<JoinHandle<()>>>>,
    recording: Arc<AtomicBool>,
}

impl CallManager {
    pub fn new(config: CallConfig) -> (Self, mpsc::UnboundedReceiver<CallEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let backend = BackendClient::new(config.backend_url.clone());
        let realtime = RealtimeApi::new(config.realtime_url.clone());

        let manager = Self {
            config,
            backend,
            realtime,
            transport: RealtimeTransport::new(),
            session: Arc::new(Mutex::new(CallSession::new())),
            events_tx,
            analyzer: Arc::new(Mutex::new(None)),
            capture: Arc::new(RwLock::new(None)),
            playback: Arc::new(RwLock::new(None)),
            greeting: Arc::new(RwLock::new(None)),
            tasks: Arc::new(RwLock::new(Vec::new())),
            hangup: Arc::new(RwLock::new(None)),
            recording: Arc::new(AtomicBool::new(false)),
        };

        (manager, events_rx)
    }

    /// Start a call. On failure the session lands in `error` with a
    /// diagnostic log entry; resources stay held until [`end_call`].
    ///
    /// [`end_call`]: CallManager::end_call
    pub async fn start_call(&self, options: CallOptions) -> Result<()> {
        if let Err(e) = self.connect(options).await {
            tracing::error!("Call setup failed: {}", e);
            self.append_log(LogEntry::system(format!("Call failed: {}", e)));
            let event = self.session.lock().unwrap().set_state(CallState::Error);
            if let Some(event) = event {
                self.emit(event);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn connect(&self, options: CallOptions) -> Result<()> {
        let session_id = self.session.lock().unwrap().begin();
        self.emit(CallEvent::StateChanged(CallState::Connecting));
        self.append_log(LogEntry::system("Starting call"));
        tracing::info!(session_id = %session_id, "Starting call");

        let model = options.model.unwrap_or_else(|| self.config.model.clone());
        let business_id = options
            .business_id
            .or_else(|| self.config.business_id.clone());

        // Microphone first: a missing or denied device should fail the
        // call before any network work happens
        let mut capture = AudioCapture::new();
        let capture_rx = capture
            .start(self.config.input_device.as_deref(), &CaptureConfig::default())
            .map_err(|e| CallError::Device(e.to_string()))?;
        tracing::debug!("Capture delivering {} Hz mono", capture.sample_rate());
        *self.capture.write().await = Some(capture);
        *self.analyzer.lock().unwrap() = Some(AudioAnalyzer::new());

        let mut encoder = AudioEncoder::new()?;
        encoder.set_bitrate(ENCODE_BITRATE)?;

        let token_response = self
            .backend
            .fetch_token(&model, business_id.as_deref())
            .await?;
        if token_response.used_config == Some(true) {
            self.append_log(LogEntry::system("Using stored agent configuration"));
        }
        if let Some(applied) = &token_response.applied {
            tracing::debug!(
                "Backend applied voice={:?} transcription={:?} temperature={:?}",
                applied.voice,
                applied.transcription_model,
                applied.temperature
            );
        }
        *self.greeting.write().await = token_response.first_message.clone();

        // Playback is best-effort; without an output device the call
        // becomes send-only
        let (remote_audio_tx, remote_audio_rx) = mpsc::channel(100);
        let mut playback = AudioPlayback::new();
        match playback.start(self.config.output_device.as_deref(), remote_audio_rx) {
            Ok(()) => *self.playback.write().await = Some(playback),
            Err(e) => {
                tracing::warn!("Playback unavailable: {}", e);
                self.append_log(LogEntry::system(format!("Playback unavailable: {}", e)));
            }
        }

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let offer = self
            .transport
            .connect(self.config.ice_servers.clone(), transport_tx, remote_audio_tx)
            .await?;

        let answer = self
            .realtime
            .exchange_sdp(&token_response.token, &model, &offer)
            .await?;
        self.transport.set_answer(answer).await?;

        self.spawn_reducer(transport_rx).await;
        self.spawn_mic_pump(capture_rx, encoder).await;
        self.spawn_vad_tick().await;

        self.recording.store(true, Ordering::SeqCst);
        {
            let mut session = self.session.lock().unwrap();
            let events = [
                session.set_state(CallState::Connected),
                session.set_state(CallState::Listening),
                session.set_vad_hint(VadHint::Listening),
            ];
            for event in events.into_iter().flatten() {
                self.emit(event);
            }
        }
        self.append_log(LogEntry::system("Call connected"));
        tracing::info!(session_id = %session_id, "Call connected");

        Ok(())
    }

    /// Tear the call down. Safe to call from any state, repeatedly;
    /// every step is independently guarded.
    pub async fn end_call(&self) {
        if let Some(handle) = self.hangup.write().await.take() {
            handle.abort();
        }
        for handle in self.tasks.write().await.drain(..) {
            handle.abort();
        }

        if let Err(e) = self.transport.close().await {
            tracing::warn!("Transport close error: {}", e);
        }

        if let Some(mut capture) = self.capture.write().await.take() {
            capture.stop();
        }
        if let Some(mut playback) = self.playback.write().await.take() {
            playback.stop();
        }
        *self.analyzer.lock().unwrap() = None;
        *self.greeting.write().await = None;
        self.recording.store(false, Ordering::SeqCst);

        let mut events = Vec::new();
        let was_active;
        let conversation = {
            let mut session = self.session.lock().unwrap();
            was_active = session.id().is_some();
            if was_active {
                let duration_ms = session
                    .started_at()
                    .map(|started| (Utc::now() - started).num_milliseconds().max(0) as u64)
                    .unwrap_or(0);
                events.push(
                    session.append_log(LogEntry::system("Call ended").with_duration(duration_ms)),
                );
            }
            if let Some(event) = session.set_state(CallState::Idle) {
                events.push(event);
            }
            if let Some(event) = session.set_vad_hint(VadHint::Idle) {
                events.push(event);
            }
            session.finish()
        };
        for event in events {
            self.emit(event);
        }

        if was_active {
            tracing::info!(
                "Call ended with {} transcript entries",
                conversation.len()
            );
        }
    }

    // Accessors

    pub fn state(&self) -> CallState {
        self.session.lock().unwrap().state()
    }

    pub fn vad_hint(&self) -> VadHint {
        self.session.lock().unwrap().vad_hint()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Instantaneous microphone level, 0.0 when nothing is capturing.
    pub fn input_level(&self) -> f32 {
        // The slot is write-locked only during setup and teardown
        match self.capture.try_read() {
            Ok(slot) => slot.as_ref().map(|c| c.get_level()).unwrap_or(0.0),
            Err(_) => 0.0,
        }
    }

    /// Transcript of the last finished call.
    pub fn conversation(&self) -> Vec<TranscriptEntry> {
        self.session.lock().unwrap().conversation()
    }

    /// Transcript of the call in progress.
    pub fn live_conversation(&self) -> Vec<TranscriptEntry> {
        self.session.lock().unwrap().live()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.session.lock().unwrap().logs()
    }

    pub fn clear_transcript(&self) {
        self.session.lock().unwrap().clear();
    }

    // Background tasks

    async fn spawn_reducer(&self, mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>) {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut reducer = EventReducer::new();
            while let Some(event) = transport_rx.recv().await {
                match event {
                    TransportEvent::ChannelOpen => manager.on_channel_open().await,
                    TransportEvent::Message(text) => {
                        let effects = reducer.apply(&text);
                        manager.run_effects(effects).await;
                    }
                    TransportEvent::ChannelClosed => {
                        tracing::debug!("Events channel closed");
                    }
                    TransportEvent::Disconnected => {
                        tracing::warn!("Peer connection lost");
                        manager.append_log(LogEntry::system("Connection lost"));
                        let event = manager
                            .session
                            .lock()
                            .unwrap()
                            .set_state(CallState::Error);
                        if let Some(event) = event {
                            manager.emit(event);
                        }
                    }
                }
            }
        });
        self.tasks.write().await.push(handle);
    }

    async fn spawn_mic_pump(
        &self,
        mut capture_rx: mpsc::Receiver<Vec<f32>>,
        mut encoder: AudioEncoder,
    ) {
        let transport = self.transport.clone();
        let analyzer = self.analyzer.clone();
        let handle = tokio::spawn(async move {
            let mut pending: Vec<f32> = Vec::new();

            while let Some(chunk) = capture_rx.recv().await {
                if let Some(analyzer) = analyzer.lock().unwrap().as_mut() {
                    analyzer.push_samples(&chunk);
                }

                pending.extend_from_slice(&chunk);
                while pending.len() >= ENCODE_FRAME_SIZE {
                    let frame: Vec<f32> = pending.drain(..ENCODE_FRAME_SIZE).collect();
                    match encoder.encode_float(&frame) {
                        Ok(encoded) => {
                            if let Err(e) = transport.send_audio(encoded).await {
                                tracing::debug!("Dropping mic frame: {}", e);
                            }
                        }
                        Err(e) => tracing::warn!("Opus encode error: {}", e),
                    }
                }
            }
        });
        self.tasks.write().await.push(handle);
    }

    async fn spawn_vad_tick(&self) {
        let session = self.session.clone();
        let events_tx = self.events_tx.clone();
        let analyzer = self.analyzer.clone();
        let handle = tokio::spawn(async move {
            let mut vad = VoiceActivityDetector::new();
            let mut ticker = tokio::time::interval(VAD_TICK);
            loop {
                ticker.tick().await;

                let frame = {
                    let mut guard = analyzer.lock().unwrap();
                    match guard.as_mut() {
                        Some(analyzer) => analyzer.analyze(),
                        None => continue,
                    }
                };

                if let Some(transition) = vad.update(frame.is_speech) {
                    let hint = match transition {
                        VadTransition::SpeechStarted => VadHint::Listening,
                        VadTransition::SpeechStopped => VadHint::Processing,
                        VadTransition::ProcessingDone => VadHint::Listening,
                    };
                    let event = session.lock().unwrap().set_vad_hint(hint);
                    if let Some(event) = event {
                        let _ = events_tx.send(event);
                    }
                }
            }
        });
        self.tasks.write().await.push(handle);
    }

    async fn on_channel_open(&self) {
        tracing::info!("Events channel open, configuring session");

        if let Err(e) = self
            .transport
            .send_event(&ClientEvent::configure_session())
            .await
        {
            tracing::warn!("Failed to send session configuration: {}", e);
        }

        if let Some(text) = self.greeting.write().await.take() {
            self.append_log(LogEntry::ai(text.clone()));
            if let Err(e) = self.transport.send_event(&ClientEvent::greeting(text)).await {
                tracing::warn!("Failed to send greeting: {}", e);
            }
        }
    }

    async fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ScheduleHangup(delay) => self.schedule_hangup(delay).await,
                other => {
                    let event = self.session.lock().unwrap().apply(other);
                    if let Some(event) = event {
                        self.emit(event);
                    }
                }
            }
        }
    }

    /// Arrange teardown after `delay`, replacing any earlier schedule.
    async fn schedule_hangup(&self, delay: Duration) {
        let manager = self.clone();
        let slot = self.hangup.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach first so end_call does not abort the task running it
            *slot.write().await = None;
            manager.end_call().await;
        });

        if let Some(previous) = self.hangup.write().await.replace(handle) {
            previous.abort();
        }
    }

    fn append_log(&self, entry: LogEntry) {
        let event = self.session.lock().unwrap().append_log(entry);
        self.emit(event);
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events_tx.send(event);
    }
}
