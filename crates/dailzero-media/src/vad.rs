//! Voice Activity Detection module
//!
//! Consumes per-tick speech judgements from the analyzer and debounces them
//! into confirmed transitions. Counting frames instead of reacting to single
//! readings prevents rapid on/off flickering from short noises.

use std::time::Duration;

/// Interval the detector is expected to be sampled on
pub const VAD_TICK: Duration = Duration::from_millis(50);

/// Confirmed change in local voice activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    /// Enough consecutive speech frames, the user is talking
    SpeechStarted,
    /// Enough consecutive silence frames, the user stopped
    SpeechStopped,
    /// The short hold after a stop has elapsed
    ProcessingDone,
}

/// Frame counts that govern when transitions fire
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Consecutive speech frames required before `SpeechStarted`
    pub min_speech_frames: u32,
    /// Consecutive silence frames required before `SpeechStopped`
    pub min_silence_frames: u32,
    /// Ticks to hold after `SpeechStopped` before `ProcessingDone`
    pub processing_hold_ticks: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            // 150ms of speech at the 50ms tick
            min_speech_frames: 3,
            // 1.25s of silence
            min_silence_frames: 25,
            // 300ms hold
            processing_hold_ticks: 6,
        }
    }
}

/// Tick-driven voice activity state machine.
///
/// Call [`update`] once per tick with the analyzer's speech judgement; a
/// transition is reported at most once per tick. The detector only describes
/// the local microphone, it never decides what the remote side is doing.
///
/// [`update`]: VoiceActivityDetector::update
pub struct VoiceActivityDetector {
    config: VadConfig,
    speaking: bool,
    speech_frames: u32,
    silence_frames: u32,
    hold_ticks: u32,
}

impl VoiceActivityDetector {
    pub fn new() -> Self {
        Self::with_config(VadConfig::default())
    }

    pub fn with_config(config: VadConfig) -> Self {
        Self {
            config,
            speaking: false,
            speech_frames: 0,
            silence_frames: 0,
            hold_ticks: 0,
        }
    }

    /// Feed one tick of analyzer output, returning a confirmed transition
    pub fn update(&mut self, is_speech: bool) -> Option<VadTransition> {
        let mut transition = None;

        if is_speech {
            self.speech_frames += 1;
            self.silence_frames = 0;
            if !self.speaking && self.speech_frames >= self.config.min_speech_frames {
                self.speaking = true;
                self.hold_ticks = 0;
                transition = Some(VadTransition::SpeechStarted);
            }
        } else {
            self.silence_frames += 1;
            self.speech_frames = 0;
            if self.speaking && self.silence_frames >= self.config.min_silence_frames {
                self.speaking = false;
                self.hold_ticks = self.config.processing_hold_ticks;
                transition = Some(VadTransition::SpeechStopped);
            }
        }

        if transition.is_none() && self.hold_ticks > 0 {
            self.hold_ticks -= 1;
            if self.hold_ticks == 0 {
                transition = Some(VadTransition::ProcessingDone);
            }
        }

        transition
    }

    /// Whether speech is currently confirmed
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn reset(&mut self) {
        self.speaking = false;
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.hold_ticks = 0;
    }
}

impl Default for VoiceActivityDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(vad: &mut VoiceActivityDetector, is_speech: bool, ticks: u32) -> Vec<VadTransition> {
        (0..ticks).filter_map(|_| vad.update(is_speech)).collect()
    }

    #[test]
    fn test_short_blip_does_not_start_speech() {
        let mut vad = VoiceActivityDetector::new();
        assert!(run(&mut vad, true, 2).is_empty());
        assert!(run(&mut vad, false, 10).is_empty());
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_sustained_speech_starts_once() {
        let mut vad = VoiceActivityDetector::new();
        let transitions = run(&mut vad, true, 10);
        assert_eq!(transitions, vec![VadTransition::SpeechStarted]);
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_brief_pause_does_not_stop_speech() {
        let mut vad = VoiceActivityDetector::new();
        run(&mut vad, true, 3);
        assert!(run(&mut vad, false, 24).is_empty());
        assert!(vad.is_speaking());
        // Resuming resets the silence count
        run(&mut vad, true, 1);
        assert!(run(&mut vad, false, 24).is_empty());
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_sustained_silence_stops_then_releases_hold() {
        let mut vad = VoiceActivityDetector::new();
        run(&mut vad, true, 3);

        let transitions = run(&mut vad, false, 25);
        assert_eq!(transitions, vec![VadTransition::SpeechStopped]);
        assert!(!vad.is_speaking());

        // Hold releases exactly one hold-length later
        let transitions = run(&mut vad, false, 5);
        assert!(transitions.is_empty());
        assert_eq!(vad.update(false), Some(VadTransition::ProcessingDone));
    }

    #[test]
    fn test_speech_during_hold_cancels_release() {
        let mut vad = VoiceActivityDetector::new();
        run(&mut vad, true, 3);
        run(&mut vad, false, 25);

        let transitions = run(&mut vad, true, 20);
        assert_eq!(transitions, vec![VadTransition::SpeechStarted]);
        assert!(run(&mut vad, true, 20).is_empty());
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut vad = VoiceActivityDetector::new();
        run(&mut vad, true, 5);
        vad.reset();
        assert!(!vad.is_speaking());
        assert!(run(&mut vad, true, 2).is_empty());
    }

    #[test]
    fn test_custom_frame_counts_govern_transitions() {
        let mut vad = VoiceActivityDetector::with_config(VadConfig {
            min_speech_frames: 1,
            min_silence_frames: 2,
            processing_hold_ticks: 1,
        });

        assert_eq!(vad.update(true), Some(VadTransition::SpeechStarted));
        assert!(vad.update(false).is_none());
        assert_eq!(vad.update(false), Some(VadTransition::SpeechStopped));
        assert_eq!(vad.update(false), Some(VadTransition::ProcessingDone));
    }
}
