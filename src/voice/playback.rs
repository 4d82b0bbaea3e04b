//! Audio playback to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};

use super::device::{choose_config, find_output_device};
use super::frame::samples_duration;
use super::resample::resample;
use crate::{Error, Result};

/// Extra wait beyond the clip length before giving up on completion
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Play mono samples on the selected output device, blocking until done
///
/// The clip is resampled when the device cannot run at `sample_rate`.
///
/// # Errors
///
/// Returns error if the device cannot be opened or the stream fails to start
pub fn play_blocking(selector: &str, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = find_output_device(&host, selector)?;

    let supported = choose_config(
        device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?,
        sample_rate,
    )
    .ok_or_else(|| Error::Audio("no f32 or i16 output config on this device".to_string()))?;

    let device_rate = supported.sample_rate().0;
    let samples = if device_rate == sample_rate {
        samples
    } else {
        tracing::debug!(from = sample_rate, to = device_rate, "resampling clip for playback");
        resample(&samples, sample_rate, device_rate)?
    };

    let config: StreamConfig = supported.config();
    let sample_count = samples.len();
    let clip = Clip {
        samples: Arc::new(samples),
        position: Arc::new(AtomicUsize::new(0)),
        finished: Arc::new(AtomicBool::new(false)),
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_playback_stream::<f32>(&device, &config, clip.clone())?,
        SampleFormat::I16 => build_playback_stream::<i16>(&device, &config, clip.clone())?,
        other => {
            return Err(Error::Audio(format!("unsupported output sample format: {other}")));
        }
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    // Poll for completion with timeout
    let timeout = samples_duration(sample_count, device_rate) + DRAIN_GRACE;
    let start = Instant::now();
    while !clip.finished.load(Ordering::Relaxed) {
        if start.elapsed() > timeout {
            tracing::warn!("playback did not drain before timeout");
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // Small delay to ensure audio finishes
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, device_rate, "playback complete");

    Ok(())
}

/// Shared playback cursor over a mono clip
#[derive(Clone)]
struct Clip {
    samples: Arc<Vec<f32>>,
    position: Arc<AtomicUsize>,
    finished: Arc<AtomicBool>,
}

impl Clip {
    /// Write the next samples into interleaved frames, repeating each across channels
    fn fill<T>(&self, data: &mut [T], channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        for frame in data.chunks_mut(channels) {
            let pos = self.position.load(Ordering::Relaxed);
            let sample = self.samples.get(pos).copied().unwrap_or_else(|| {
                self.finished.store(true, Ordering::Relaxed);
                0.0
            });
            frame.fill(T::from_sample(sample));
            if pos < self.samples.len() {
                self.position.store(pos + 1, Ordering::Relaxed);
            }
        }
    }
}

fn build_playback_stream<T>(device: &Device, config: &StreamConfig, clip: Clip) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels.max(1));

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| clip.fill(data, channels),
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Scale samples by a 0-100 volume
pub fn apply_volume(samples: &mut [f32], volume: u8) {
    let gain = f32::from(volume.min(100)) / 100.0;
    for sample in samples {
        *sample = (*sample * gain).clamp(-1.0, 1.0);
    }
}
