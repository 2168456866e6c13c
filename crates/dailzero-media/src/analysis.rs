use std::collections::VecDeque;

/// Number of recent samples examined per analysis pass
pub const ANALYSIS_WINDOW: usize = 2048;

/// Fixed lower bound for the adaptive speech threshold
pub const MIN_SPEECH_THRESHOLD: f32 = 0.02;

/// Weight given to the previous reading when smoothing volume
const SMOOTHING: f32 = 0.3;

/// Quietest level mapped onto the normalized volume scale
const MIN_DB: f32 = -90.0;

/// Loudest level mapped onto the normalized volume scale
const MAX_DB: f32 = -10.0;

/// Volume readings kept for the noise floor percentile
const HISTORY_LEN: usize = 50;

/// Readings averaged for the recent-activity threshold component
const RECENT_LEN: usize = 10;

/// One analysis pass over the current window
#[derive(Debug, Clone, Copy)]
pub struct AnalysisFrame {
    /// Smoothed volume on a 0.0 to 1.0 scale
    pub volume: f32,
    /// 10th percentile of recent volume, tracks ambient noise
    pub noise_floor: f32,
    /// Level the volume must exceed to count as speech
    pub adaptive_threshold: f32,
    pub is_speech: bool,
}

/// Rolling loudness analysis over captured microphone samples.
///
/// Callers push raw samples as they arrive and call [`analyze`] on a fixed
/// tick. Each pass converts window RMS to decibels, normalizes onto a 0-1
/// scale, smooths it against the previous reading, and re-derives the noise
/// floor and speech threshold from the reading history. The threshold adapts
/// to the environment but never drops below [`MIN_SPEECH_THRESHOLD`], so a
/// dead-quiet room cannot make breathing register as speech.
///
/// [`analyze`]: AudioAnalyzer::analyze
pub struct AudioAnalyzer {
    window: VecDeque<f32>,
    history: VecDeque<f32>,
    smoothed_volume: f32,
    noise_floor: f32,
    adaptive_threshold: f32,
}

impl AudioAnalyzer {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(ANALYSIS_WINDOW),
            history: VecDeque::with_capacity(HISTORY_LEN),
            smoothed_volume: 0.0,
            noise_floor: 0.0,
            adaptive_threshold: MIN_SPEECH_THRESHOLD,
        }
    }

    /// Append captured samples, keeping only the most recent window
    pub fn push_samples(&mut self, samples: &[f32]) {
        self.window.extend(samples.iter().copied());
        let excess = self.window.len().saturating_sub(ANALYSIS_WINDOW);
        if excess > 0 {
            self.window.drain(..excess);
        }
    }

    /// Run one analysis pass over the current window
    pub fn analyze(&mut self) -> AnalysisFrame {
        let rms = calculate_rms(self.window.make_contiguous());
        let db = amplitude_to_db(rms);
        let normalized = (db.clamp(MIN_DB, MAX_DB) - MIN_DB) / (MAX_DB - MIN_DB);
        self.smoothed_volume = self.smoothed_volume * SMOOTHING + normalized * (1.0 - SMOOTHING);

        self.history.push_back(self.smoothed_volume);
        if self.history.len() > HISTORY_LEN {
            self.history.pop_front();
        }

        let readings: Vec<f32> = self.history.iter().copied().collect();
        self.noise_floor = percentile(&readings, 0.1);

        let recent: Vec<f32> = readings.iter().rev().take(RECENT_LEN).copied().collect();
        let recent_avg = recent.iter().sum::<f32>() / recent.len() as f32;

        self.adaptive_threshold = (self.noise_floor * 2.0)
            .max(recent_avg * 0.3)
            .max(MIN_SPEECH_THRESHOLD);

        let is_speech = self.smoothed_volume > self.noise_floor * 1.5
            && self.smoothed_volume > self.adaptive_threshold;

        AnalysisFrame {
            volume: self.smoothed_volume,
            noise_floor: self.noise_floor,
            adaptive_threshold: self.adaptive_threshold,
            is_speech,
        }
    }

    pub fn volume(&self) -> f32 {
        self.smoothed_volume
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    pub fn adaptive_threshold(&self) -> f32 {
        self.adaptive_threshold
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.history.clear();
        self.smoothed_volume = 0.0;
        self.noise_floor = 0.0;
        self.adaptive_threshold = MIN_SPEECH_THRESHOLD;
    }
}

impl Default for AudioAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

fn amplitude_to_db(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        MIN_DB
    } else {
        20.0 * amplitude.log10()
    }
}

fn percentile(values: &[f32], fraction: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() as f32 * fraction) as usize).min(sorted.len() - 1);
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(analyzer: &mut AudioAnalyzer, amplitude: f32, passes: usize) -> AnalysisFrame {
        let samples = vec![amplitude; ANALYSIS_WINDOW];
        let mut frame = AnalysisFrame {
            volume: 0.0,
            noise_floor: 0.0,
            adaptive_threshold: 0.0,
            is_speech: false,
        };
        for _ in 0..passes {
            analyzer.push_samples(&samples);
            frame = analyzer.analyze();
        }
        frame
    }

    #[test]
    fn test_rms_of_silence_is_zero() {
        assert_eq!(calculate_rms(&[0.0; 64]), 0.0);
        assert_eq!(calculate_rms(&[]), 0.0);
    }

    #[test]
    fn test_rms_of_constant_signal() {
        let rms = calculate_rms(&[0.5; 64]);
        assert!((rms - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_amplitude_to_db_handles_silence() {
        assert_eq!(amplitude_to_db(0.0), MIN_DB);
        assert!((amplitude_to_db(1.0) - 0.0).abs() < 1e-6);
        assert!((amplitude_to_db(0.1) + 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_percentile_picks_low_readings() {
        let values: Vec<f32> = (0..50).map(|i| i as f32 / 50.0).collect();
        let p10 = percentile(&values, 0.1);
        assert!((p10 - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_volume_saturates_for_loud_input() {
        let mut analyzer = AudioAnalyzer::new();
        let frame = feed(&mut analyzer, 1.0, 5);
        assert!(frame.volume > 0.9);
        assert!(frame.volume <= 1.0);
    }

    #[test]
    fn test_threshold_never_drops_below_fixed_floor() {
        let mut analyzer = AudioAnalyzer::new();
        for _ in 0..60 {
            let frame = feed(&mut analyzer, 1e-5, 1);
            assert!(frame.adaptive_threshold >= MIN_SPEECH_THRESHOLD);
            assert!(!frame.is_speech);
        }
        // Long silence collapses the noise floor but not the threshold
        assert!(analyzer.noise_floor() < MIN_SPEECH_THRESHOLD / 2.0);
        assert!((analyzer.adaptive_threshold() - MIN_SPEECH_THRESHOLD).abs() < 1e-6);
    }

    #[test]
    fn test_speech_detected_above_quiet_background() {
        let mut analyzer = AudioAnalyzer::new();

        // Settle on a quiet room tone first
        let quiet = feed(&mut analyzer, 1e-4, 50);
        assert!(!quiet.is_speech);

        let loud = feed(&mut analyzer, 0.01, 1);
        assert!(loud.volume > loud.noise_floor * 1.5);
        assert!(loud.is_speech);
    }

    #[test]
    fn test_window_keeps_most_recent_samples() {
        let mut analyzer = AudioAnalyzer::new();
        analyzer.push_samples(&vec![0.5; ANALYSIS_WINDOW]);
        analyzer.push_samples(&vec![0.0; ANALYSIS_WINDOW]);
        let frame = analyzer.analyze();
        assert!(frame.volume < 1e-3);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut analyzer = AudioAnalyzer::new();
        feed(&mut analyzer, 0.5, 10);
        analyzer.reset();
        assert_eq!(analyzer.volume(), 0.0);
        assert_eq!(analyzer.adaptive_threshold(), MIN_SPEECH_THRESHOLD);
    }
}
