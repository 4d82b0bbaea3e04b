//! Audio capture from microphone

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};

use super::device::{choose_config, find_input_device};
use super::frame::{FrameSource, samples_duration};
use super::resample::StreamResampler;
use crate::config::RuntimeConfig;
use crate::{Error, Result};

/// Seconds of audio kept while nobody reads; older samples are dropped
const MAX_BUFFERED_SECS: usize = 5;

/// Poll interval while waiting for a frame to fill
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Slack on top of the frame duration before a read counts as stalled
const STALL_GRACE: Duration = Duration::from_millis(500);

/// Captures mono audio from the selected input device
///
/// The stream is opened lazily on the first read, so a missing device does not
/// prevent construction.
pub struct CpalCapture {
    selector: String,
    sample_rate: u32,
    buffer: Arc<Mutex<VecDeque<f32>>>,
    stream: Option<Stream>,
}

impl CpalCapture {
    /// Create a capture for the device matching `selector`
    #[must_use]
    pub fn new(selector: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            selector: selector.into(),
            sample_rate,
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            stream: None,
        }
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if the device has no usable input config or the stream
    /// cannot be opened
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = find_input_device(&host, &self.selector)?;

        let supported = choose_config(
            device
                .supported_input_configs()
                .map_err(|e| Error::Audio(e.to_string()))?,
            self.sample_rate,
        )
        .ok_or_else(|| Error::Audio("no f32 or i16 input config on this device".to_string()))?;

        let device_rate = supported.sample_rate().0;
        let resampler = if device_rate == self.sample_rate {
            None
        } else {
            Some(StreamResampler::new(device_rate, self.sample_rate)?)
        };
        let sink = CaptureSink {
            buffer: Arc::clone(&self.buffer),
            max_buffered: self.sample_rate as usize * MAX_BUFFERED_SECS,
            resampler,
        };

        let config: StreamConfig = supported.config();
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_capture_stream::<f32>(&device, &config, sink)?,
            SampleFormat::I16 => build_capture_stream::<i16>(&device, &config, sink)?,
            other => {
                return Err(Error::Audio(format!("unsupported input sample format: {other}")));
            }
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            format = %supported.sample_format(),
            device_rate,
            sample_rate = self.sample_rate,
            channels = config.channels,
            "audio capture started"
        );
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.clear_buffer();
            tracing::debug!("audio capture stopped");
        }
    }

    /// Get captured audio buffer without clearing
    #[must_use]
    pub fn peek_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|buf| buf.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn try_take(&self, len: usize) -> Option<Vec<f32>> {
        let mut buf = self.buffer.lock().ok()?;
        if buf.len() < len {
            return None;
        }
        Some(buf.drain(..len).collect())
    }
}

#[async_trait(?Send)]
impl FrameSource for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn read_frame(&mut self, len: usize) -> Result<Vec<f32>> {
        self.start()?;

        let deadline = samples_duration(len, self.sample_rate) * 4 + STALL_GRACE;
        let started = Instant::now();

        loop {
            if let Some(frame) = self.try_take(len) {
                return Ok(frame);
            }
            if started.elapsed() > deadline {
                // Force a reopen on the next read
                self.stop();
                return Err(Error::Audio("capture stalled".to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn discard_pending(&mut self) {
        self.clear_buffer();
    }

    fn suspend(&mut self) {
        self.stop();
    }

    fn update_config(&mut self, config: &RuntimeConfig) {
        if config.input_device != self.selector || config.sample_rate != self.sample_rate {
            tracing::info!(
                device = %config.input_device,
                sample_rate = config.sample_rate,
                "capture settings changed, reopening on next read"
            );
            self.stop();
            self.selector.clone_from(&config.input_device);
            self.sample_rate = config.sample_rate;
        }
    }
}

/// Receives mono samples from the device callback
struct CaptureSink {
    buffer: Arc<Mutex<VecDeque<f32>>>,
    max_buffered: usize,
    resampler: Option<StreamResampler>,
}

impl CaptureSink {
    fn push(&mut self, mono: Vec<f32>) {
        let samples = match self.resampler.as_mut() {
            Some(resampler) => match resampler.process(&mono) {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::error!(error = %e, "capture resampling failed");
                    return;
                }
            },
            None => mono,
        };

        if let Ok(mut buf) = self.buffer.lock() {
            buf.extend(samples);
            let excess = buf.len().saturating_sub(self.max_buffered);
            if excess > 0 {
                buf.drain(..excess);
            }
        }
    }
}

fn build_capture_stream<T>(device: &Device, config: &StreamConfig, mut sink: CaptureSink) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                sink.push(downmix(data, channels).collect());
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Average interleaved channels down to mono f32
#[allow(clippy::cast_precision_loss)]
fn downmix<T>(data: &[T], channels: usize) -> impl Iterator<Item = f32> + '_
where
    T: Sample,
    f32: FromSample<T>,
{
    data.chunks(channels).map(|frame| {
        frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32
    })
}
