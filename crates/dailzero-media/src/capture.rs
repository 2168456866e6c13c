use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::codec::{decimate, Resampler, CAPTURE_SAMPLE_RATE};

/// Information about an audio device
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub name: String,
    pub is_default: bool,
}

/// List all available input (microphone) devices
pub fn list_input_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices: Vec<AudioDevice> = host
        .input_devices()?
        .filter_map(|d| {
            let name = d.name().ok()?;
            Some(AudioDevice {
                is_default: default_name.as_ref() == Some(&name),
                name,
            })
        })
        .collect();

    Ok(devices)
}

/// List all available output (speaker) devices
pub fn list_output_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices: Vec<AudioDevice> = host
        .output_devices()?
        .filter_map(|d| {
            let name = d.name().ok()?;
            Some(AudioDevice {
                is_default: default_name.as_ref() == Some(&name),
                name,
            })
        })
        .collect();

    Ok(devices)
}

/// Processing preferences requested for the microphone stream.
///
/// Echo cancellation, noise suppression, and gain control are handled by the
/// platform capture pipeline where available; cpal exposes no switches for
/// them, so the flags are recorded here and surfaced in session logs.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Microphone capture that delivers mono f32 frames over a channel.
///
/// The cpal stream is owned by a dedicated thread because streams are not
/// `Send`; the handle itself can live inside async tasks.
pub struct AudioCapture {
    stop_tx: Option<std_mpsc::Sender<()>>,
    worker: Option<std::thread::JoinHandle<()>>,
    /// Atomic storage for input level (RMS as f32 bits)
    level: Arc<AtomicU32>,
    sample_rate: u32,
    is_capturing: bool,
}

impl AudioCapture {
    pub fn new() -> Self {
        Self {
            stop_tx: None,
            worker: None,
            level: Arc::new(AtomicU32::new(0)),
            sample_rate: CAPTURE_SAMPLE_RATE,
            is_capturing: false,
        }
    }

    /// Get the current input level (0.0 to 1.0)
    pub fn get_level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    /// Sample rate of the frames delivered by the receiver from `start`
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_capturing(&self) -> bool {
        self.is_capturing
    }

    pub fn start(
        &mut self,
        device_name: Option<&str>,
        config: &CaptureConfig,
    ) -> Result<mpsc::Receiver<Vec<f32>>> {
        if self.is_capturing {
            anyhow::bail!("Audio capture already running");
        }

        let (tx, rx) = mpsc::channel(100);
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();

        let level = self.level.clone();
        let device_name = device_name.map(|s| s.to_string());
        let target_rate = config.sample_rate;

        let worker = std::thread::spawn(move || {
            let stream = match open_input_stream(device_name.as_deref(), target_rate, level, tx) {
                Ok((stream, delivered_rate)) => {
                    let _ = ready_tx.send(Ok(delivered_rate));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Park until stop is signalled, then drop the stream
            let _ = stop_rx.recv();
            drop(stream);
        });

        match ready_rx.recv_timeout(Duration::from_secs(3)) {
            Ok(Ok(delivered_rate)) => {
                self.stop_tx = Some(stop_tx);
                self.worker = Some(worker);
                self.sample_rate = delivered_rate;
                self.is_capturing = true;
                Ok(rx)
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = stop_tx.send(());
                let _ = worker.join();
                Err(anyhow::anyhow!("Timed out starting audio capture stream"))
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.is_capturing = false;
        self.level.store(0.0f32.to_bits(), Ordering::Relaxed);
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Default for AudioCapture {
    fn default() -> Self {
        Self::new()
    }
}

fn open_input_stream(
    device_name: Option<&str>,
    target_rate: u32,
    level: Arc<AtomicU32>,
    tx: mpsc::Sender<Vec<f32>>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow::anyhow!("Input device not found: {}", name))?
    } else {
        host.default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No default input device"))?
    };

    let config = pick_input_config(&device, target_rate)?;
    let sample_format = config.sample_format();
    let native_rate = config.sample_rate().0;
    let channels = config.channels() as usize;

    // Integer multiples of the target decimate with averaging; anything
    // else, 44.1kHz-only devices in particular, goes through the streaming
    // resampler. Either way the channel carries the target rate.
    let ratio = if native_rate > target_rate && native_rate % target_rate == 0 {
        (native_rate / target_rate) as usize
    } else {
        1
    };
    let resampler = if ratio == 1 && native_rate != target_rate {
        tracing::info!("Resampling capture audio {} -> {} Hz", native_rate, target_rate);
        Some(Resampler::new(native_rate, target_rate))
    } else {
        None
    };

    tracing::info!(
        "Starting audio capture: {} Hz, {} channels, delivering {} Hz mono",
        native_rate,
        channels,
        target_rate
    );

    let stream_config: cpal::StreamConfig = config.into();
    let stream = match sample_format {
        cpal::SampleFormat::F32 => {
            build_input::<f32>(&device, &stream_config, channels, ratio, resampler, level, tx)?
        }
        cpal::SampleFormat::I16 => {
            build_input::<i16>(&device, &stream_config, channels, ratio, resampler, level, tx)?
        }
        cpal::SampleFormat::U16 => {
            build_input::<u16>(&device, &stream_config, channels, ratio, resampler, level, tx)?
        }
        other => anyhow::bail!("Unsupported input sample format: {:?}", other),
    };

    stream.play()?;
    Ok((stream, target_rate))
}

/// Prefer a native config at the target rate; fall back to the device default
fn pick_input_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    if let Ok(ranges) = device.supported_input_configs() {
        for range in ranges {
            if range.min_sample_rate().0 <= target_rate
                && target_rate <= range.max_sample_rate().0
            {
                return Ok(range.with_sample_rate(cpal::SampleRate(target_rate)));
            }
        }
    }
    Ok(device.default_input_config()?)
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    ratio: usize,
    mut resampler: Option<Resampler>,
    level: Arc<AtomicU32>,
    tx: mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    use cpal::Sample;

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if data.is_empty() {
                return;
            }
            let samples: Vec<f32> = data.iter().map(|s| f32::from_sample(*s)).collect();

            // Calculate RMS level for the input meter
            let sum: f32 = samples.iter().map(|s| s * s).sum();
            let rms = (sum / samples.len() as f32).sqrt();
            level.store(rms.min(1.0).to_bits(), Ordering::Relaxed);

            // Convert to mono by averaging all channels
            let mono: Vec<f32> = if channels > 1 {
                samples
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                    .collect()
            } else {
                samples
            };

            // Bridge to the target rate before handing off
            let bridged = if ratio > 1 {
                decimate(&mono, ratio)
            } else if let Some(resampler) = resampler.as_mut() {
                resampler.process(&mono)
            } else {
                mono
            };

            // Drop frames rather than block the audio thread
            let _ = tx.try_send(bridged);
        },
        |err| {
            tracing::error!("Audio capture error: {}", err);
        },
        None,
    )?;

    Ok(stream)
}
