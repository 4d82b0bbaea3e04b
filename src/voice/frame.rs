//! Audio frames and the frame source seam

use std::time::Duration;

use async_trait::async_trait;

use crate::config::RuntimeConfig;
use crate::{Error, Result};

/// Frame size fed to the wake gate
pub const WAKE_FRAME_MS: u32 = 80;

/// Frame size fed to the voice-activity detector while recording
pub const RECORD_FRAME_MS: u32 = 30;

/// Number of samples in a frame of `frame_ms` at `sample_rate`
#[must_use]
pub const fn frame_len(sample_rate: u32, frame_ms: u32) -> usize {
    (sample_rate as usize * frame_ms as usize) / 1000
}

/// Wall-clock duration of `samples` mono samples at `sample_rate`
#[must_use]
pub fn samples_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(samples as u64 * 1_000_000 / u64::from(sample_rate))
}

/// Continuous mono capture, served in fixed-size frames
///
/// Reads block for roughly one frame duration and never wait unboundedly.
#[async_trait(?Send)]
pub trait FrameSource {
    /// Sample rate of the frames this source produces
    fn sample_rate(&self) -> u32;

    /// Read the next `len` samples
    ///
    /// # Errors
    ///
    /// Returns error if the stream fails or stalls
    async fn read_frame(&mut self, len: usize) -> Result<Vec<f32>>;

    /// Drop audio buffered while nobody was reading
    fn discard_pending(&mut self) {}

    /// Release the hardware until the next read
    fn suspend(&mut self) {}

    /// Pick up device or sample-rate changes; applied on the next read
    fn update_config(&mut self, _config: &RuntimeConfig) {}
}

/// One chunk of mono PCM tagged by the voice-activity detector
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub is_speech: bool,
}

/// Frames accumulated for a single spoken command
#[derive(Debug, Clone)]
pub struct UtteranceBuffer {
    frames: Vec<AudioFrame>,
    sample_rate: u32,
}

impl UtteranceBuffer {
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self {
            frames: Vec::new(),
            sample_rate,
        }
    }

    pub fn push(&mut self, frame: AudioFrame) {
        self.frames.push(frame);
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total number of samples across all frames
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(|f| f.samples.len()).sum()
    }

    /// Audio duration of the buffered frames
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(self.sample_count(), self.sample_rate)
    }

    /// Number of frames classified as speech
    #[must_use]
    pub fn speech_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.is_speech).count()
    }

    /// Concatenated samples
    #[must_use]
    pub fn samples(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.sample_count());
        for frame in &self.frames {
            out.extend_from_slice(&frame.samples);
        }
        out
    }

    /// Encode as 16-bit mono WAV
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples(), self.sample_rate)
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(sample_i16)?;
        }

        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// RMS energy of a frame
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
