use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::codec::{Resampler, PLAYBACK_SAMPLE_RATE};

/// Speaker playback fed with mono f32 frames over a channel.
///
/// Frames are expanded to the device channel count and buffered; the output
/// callback drains the buffer and pads with silence on underrun. As with
/// capture, the cpal stream lives on its own thread.
pub struct AudioPlayback {
    stop_flag: Arc<AtomicBool>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    worker: Option<std::thread::JoinHandle<()>>,
    is_playing: bool,
}

impl AudioPlayback {
    pub fn new() -> Self {
        Self {
            stop_flag: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            worker: None,
            is_playing: false,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Start playback on a specific device (or default if None)
    pub fn start(
        &mut self,
        device_name: Option<&str>,
        rx: mpsc::Receiver<Vec<f32>>,
    ) -> Result<()> {
        if self.is_playing {
            anyhow::bail!("Audio playback already running");
        }

        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = self.stop_flag.clone();

        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let device_name = device_name.map(|s| s.to_string());

        let worker = std::thread::spawn(move || {
            let stream = match open_output_stream(device_name.as_deref(), stop_flag, rx) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let _ = stop_rx.recv();
            drop(stream);
        });

        match ready_rx.recv_timeout(Duration::from_secs(3)) {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.worker = Some(worker);
                self.is_playing = true;
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = stop_tx.send(());
                let _ = worker.join();
                Err(anyhow::anyhow!("Timed out starting audio playback stream"))
            }
        }
    }

    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.is_playing = false;
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Default for AudioPlayback {
    fn default() -> Self {
        Self::new()
    }
}

fn open_output_stream(
    device_name: Option<&str>,
    stop_flag: Arc<AtomicBool>,
    mut rx: mpsc::Receiver<Vec<f32>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.output_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow::anyhow!("Output device not found: {}", name))?
    } else {
        host.default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No default output device"))?
    };

    let config = pick_output_config(&device)?;
    let sample_format = config.sample_format();
    let device_rate = config.sample_rate().0;
    let output_channels = config.channels() as usize;

    tracing::info!(
        "Starting audio playback: {} Hz, {} channels",
        device_rate,
        output_channels
    );

    // Decoded frames arrive at the playback rate; devices that run at
    // another rate get the stream resampled before channel expansion
    let mut resampler = if device_rate != PLAYBACK_SAMPLE_RATE {
        tracing::info!("Resampling playback audio {} -> {} Hz", PLAYBACK_SAMPLE_RATE, device_rate);
        Some(Resampler::new(PLAYBACK_SAMPLE_RATE, device_rate))
    } else {
        None
    };

    let sample_buffer = Arc::new(Mutex::new(Vec::<f32>::new()));
    let buffer_clone = sample_buffer.clone();

    // Limit buffer size to prevent memory growth
    let max_buffer = device_rate as usize * 2;

    // Receive mono frames and expand to the output channel count
    std::thread::spawn(move || {
        while !stop_flag.load(Ordering::SeqCst) {
            match rx.blocking_recv() {
                Some(mono_samples) => {
                    let mono = match resampler.as_mut() {
                        Some(resampler) => resampler.process(&mono_samples),
                        None => mono_samples,
                    };
                    let expanded: Vec<f32> = mono
                        .iter()
                        .flat_map(|&sample| std::iter::repeat(sample).take(output_channels))
                        .collect();

                    let mut buffer = buffer_clone.lock().unwrap();
                    if buffer.len() < max_buffer {
                        buffer.extend(expanded);
                    }
                }
                None => break, // Channel closed
            }
        }
    });

    let stream_config: cpal::StreamConfig = config.into();
    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_output::<f32>(&device, &stream_config, sample_buffer)?,
        cpal::SampleFormat::I16 => build_output::<i16>(&device, &stream_config, sample_buffer)?,
        cpal::SampleFormat::U16 => build_output::<u16>(&device, &stream_config, sample_buffer)?,
        other => anyhow::bail!("Unsupported output sample format: {:?}", other),
    };

    stream.play()?;
    Ok(stream)
}

/// Prefer a native config at the playback rate; fall back to the device default
fn pick_output_config(device: &cpal::Device) -> Result<cpal::SupportedStreamConfig> {
    if let Ok(ranges) = device.supported_output_configs() {
        for range in ranges {
            if range.min_sample_rate().0 <= PLAYBACK_SAMPLE_RATE
                && PLAYBACK_SAMPLE_RATE <= range.max_sample_rate().0
            {
                return Ok(range.with_sample_rate(cpal::SampleRate(PLAYBACK_SAMPLE_RATE)));
            }
        }
    }
    Ok(device.default_output_config()?)
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_buffer: Arc<Mutex<Vec<f32>>>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut buffer = sample_buffer.lock().unwrap();
            let len = data.len().min(buffer.len());

            for (i, sample) in data.iter_mut().enumerate() {
                if i < len {
                    *sample = T::from_sample(buffer[i]);
                } else {
                    *sample = T::from_sample(0.0f32);
                }
            }

            if len > 0 {
                buffer.drain(0..len);
            }
        },
        |err| {
            tracing::error!("Audio playback error: {}", err);
        },
        None,
    )?;

    Ok(stream)
}
