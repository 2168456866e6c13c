//! Audio layer for DailZero: microphone capture, speaker playback, Opus
//! framing, volume analysis, and tick-driven voice activity detection.
//!
//! Capture runs at 16 kHz mono so frames can be Opus-encoded for the
//! realtime peer; playback runs at 48 kHz where the remote decoder emits.

pub mod analysis;
pub mod capture;
pub mod codec;
pub mod playback;
pub mod vad;

pub use analysis::{AnalysisFrame, AudioAnalyzer, MIN_SPEECH_THRESHOLD};
pub use capture::{list_input_devices, list_output_devices, AudioCapture, AudioDevice, CaptureConfig};
pub use codec::{
    decimate, AudioDecoder, AudioEncoder, Resampler, CAPTURE_SAMPLE_RATE, DECODE_FRAME_SIZE,
    ENCODE_BITRATE, ENCODE_FRAME_SIZE, FRAME_DURATION_MS, PLAYBACK_SAMPLE_RATE,
};
pub use playback::AudioPlayback;
pub use vad::{VadConfig, VadTransition, VoiceActivityDetector, VAD_TICK};
