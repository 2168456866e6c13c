use anyhow::Result;
use opus::{Decoder as OpusDecoder, Encoder as OpusEncoder};

/// Sample rate microphone audio is captured and encoded at (16kHz)
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate remote audio is decoded and played back at (48kHz)
pub const PLAYBACK_SAMPLE_RATE: u32 = 48000;

/// Duration of one Opus frame in milliseconds
pub const FRAME_DURATION_MS: usize = 20;

/// Encoder frame size in samples (20ms mono at 16kHz)
pub const ENCODE_FRAME_SIZE: usize = 320;

/// Decoder frame size in samples (20ms mono at 48kHz)
pub const DECODE_FRAME_SIZE: usize = 960;

/// Encoder bitrate for outgoing voice (bits per second)
pub const ENCODE_BITRATE: u32 = 24_000;

/// Opus encoder for outgoing microphone audio
pub struct AudioEncoder {
    encoder: OpusEncoder,
}

impl AudioEncoder {
    pub fn new() -> Result<Self> {
        let encoder = OpusEncoder::new(
            CAPTURE_SAMPLE_RATE,
            opus::Channels::Mono,
            opus::Application::Voip,
        )?;

        Ok(Self { encoder })
    }

    /// Encode one frame of float PCM samples to Opus
    pub fn encode_float(&mut self, pcm: &[f32]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; 4000]; // Max opus packet size
        let len = self.encoder.encode_float(pcm, &mut output)?;
        output.truncate(len);
        Ok(output)
    }

    /// Set the bitrate (in bits per second)
    pub fn set_bitrate(&mut self, bitrate: u32) -> Result<()> {
        self.encoder.set_bitrate(opus::Bitrate::Bits(bitrate as i32))?;
        Ok(())
    }
}

/// Opus decoder for incoming remote audio
pub struct AudioDecoder {
    decoder: OpusDecoder,
}

impl AudioDecoder {
    pub fn new() -> Result<Self> {
        let decoder = OpusDecoder::new(PLAYBACK_SAMPLE_RATE, opus::Channels::Mono)?;

        Ok(Self { decoder })
    }

    /// Decode an Opus packet to float PCM samples
    pub fn decode_float(&mut self, opus_data: &[u8]) -> Result<Vec<f32>> {
        let mut output = vec![0f32; DECODE_FRAME_SIZE];
        let len = self.decoder.decode_float(opus_data, &mut output, false)?;
        output.truncate(len);
        Ok(output)
    }

    /// Generate concealment audio for a lost or undecodable packet
    pub fn conceal_loss(&mut self) -> Result<Vec<f32>> {
        let mut output = vec![0f32; DECODE_FRAME_SIZE];
        let len = self.decoder.decode_float(&[], &mut output, true)?;
        output.truncate(len);
        Ok(output)
    }
}

/// Reduce the sample rate by an integer ratio, averaging each chunk of
/// consecutive samples into one output sample.
pub fn decimate(samples: &[f32], ratio: usize) -> Vec<f32> {
    if ratio <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(ratio)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect()
}

/// Streaming linear-interpolation resampler for rate pairs that do not
/// divide evenly, such as 44.1kHz devices feeding the 16kHz encoder.
///
/// Carries the fractional read position and the unconsumed input tail
/// across calls, so a continuous stream can be fed in arbitrary chunks
/// without seams at the boundaries.
pub struct Resampler {
    /// Input samples advanced per output sample
    step: f64,
    pos: f64,
    pending: Vec<f32>,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate as f64 / to_rate as f64,
            pos: 0.0,
            pending: Vec::new(),
        }
    }

    /// Feed input samples and get back every output sample that is ready
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.step == 1.0 && self.pending.is_empty() {
            return input.to_vec();
        }
        self.pending.extend_from_slice(input);

        let mut output = Vec::with_capacity((input.len() as f64 / self.step) as usize + 2);
        while self.pos + 1.0 < self.pending.len() as f64 {
            let idx = self.pos as usize;
            let frac = self.pos - idx as f64;
            let sample =
                self.pending[idx] as f64 * (1.0 - frac) + self.pending[idx + 1] as f64 * frac;
            output.push(sample as f32);
            self.pos += self.step;
        }

        // Keep the straddled sample so the next chunk interpolates from it
        let consumed = (self.pos as usize).min(self.pending.len());
        self.pending.drain(..consumed);
        self.pos -= consumed as f64;

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let mut encoder = AudioEncoder::new().unwrap();
        let mut decoder = AudioDecoder::new().unwrap();

        let pcm: Vec<f32> = vec![0.0; ENCODE_FRAME_SIZE];

        let encoded = encoder.encode_float(&pcm).unwrap();
        assert!(!encoded.is_empty());

        // 20ms in stays 20ms out, resampled to the playback rate
        let decoded = decoder.decode_float(&encoded).unwrap();
        assert_eq!(decoded.len(), DECODE_FRAME_SIZE);
    }

    #[test]
    fn test_conceal_loss_fills_a_frame() {
        let mut decoder = AudioDecoder::new().unwrap();
        let concealed = decoder.conceal_loss().unwrap();
        assert_eq!(concealed.len(), DECODE_FRAME_SIZE);
    }

    #[test]
    fn test_decimate_averages_chunks() {
        let samples = vec![0.0, 0.6, 0.3, 0.9, 1.0, 0.2];
        let out = decimate(&samples, 3);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!((out[1] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_decimate_ratio_one_is_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(decimate(&samples, 1), samples);
    }

    #[test]
    fn test_voice_bitrate_is_accepted() {
        let mut encoder = AudioEncoder::new().unwrap();
        encoder.set_bitrate(ENCODE_BITRATE).unwrap();

        let pcm: Vec<f32> = vec![0.0; ENCODE_FRAME_SIZE];
        let encoded = encoder.encode_float(&pcm).unwrap();
        assert!(!encoded.is_empty());
    }

    #[test]
    fn test_resample_passthrough_at_equal_rates() {
        let mut resampler = Resampler::new(16000, 16000);
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resampler.process(&samples), samples);
    }

    #[test]
    fn test_resample_halves_an_exact_ratio() {
        let mut resampler = Resampler::new(32000, 16000);
        let out = resampler.process(&[0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out, vec![0.0, 2.0]);
    }

    #[test]
    fn test_resample_interpolates_fractional_positions() {
        let mut resampler = Resampler::new(24000, 16000);
        let out = resampler.process(&[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(out, vec![0.0, 1.5]);
    }

    #[test]
    fn test_resample_is_continuous_across_chunks() {
        let mut resampler = Resampler::new(16000, 32000);
        assert_eq!(resampler.process(&[0.0, 2.0]), vec![0.0, 1.0]);
        assert_eq!(resampler.process(&[4.0]), vec![2.0, 3.0]);
    }

    #[test]
    fn test_resample_preserves_duration_from_44100() {
        // One second of 44.1kHz input fed in device-sized chunks must
        // come out as one second at 16kHz, not sped-up or stretched
        let mut resampler = Resampler::new(44100, 16000);
        let chunk = vec![0.25f32; 441];
        let total: usize = (0..100).map(|_| resampler.process(&chunk).len()).sum();
        assert!((total as i64 - 16000).abs() <= 4, "total samples: {}", total);
    }
}
