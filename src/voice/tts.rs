//! Text-to-speech (TTS) processing
//!
//! Synthesis runs Festival's `text2wave` as a subprocess; the resulting WAV is
//! scaled to the configured volume and played through cpal.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::playback::{apply_volume, play_blocking};
use crate::config::RuntimeConfig;
use crate::{Error, Result};

/// Upper bound on one synthesis subprocess run
const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(60);

/// Festival's text-to-WAV front end
const TEXT2WAVE: &str = "text2wave";

/// Speaks text aloud
#[async_trait(?Send)]
pub trait SpeechSynthesizer {
    /// Synthesize and play `text` at `volume` (0-100), returning when playback ends
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&mut self, text: &str, volume: u8) -> Result<()>;

    /// Pick up output device changes
    fn update_config(&mut self, _config: &RuntimeConfig) {}
}

/// Festival-backed synthesizer
#[derive(Debug, Clone)]
pub struct FestivalSynthesizer {
    program: String,
    output_device: String,
}

impl FestivalSynthesizer {
    #[must_use]
    pub fn new(output_device: impl Into<String>) -> Self {
        Self {
            program: TEXT2WAVE.to_string(),
            output_device: output_device.into(),
        }
    }

    /// Use a different `text2wave`-compatible program
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Whether the synthesis program is on `PATH`
    #[must_use]
    pub fn is_installed(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    async fn synthesize(&self, text: &str, wav_path: &Path) -> Result<()> {
        let mut child = tokio::process::Command::new(&self.program)
            .arg("-o")
            .arg(wav_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Tts(format!("failed to start {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            // Closing stdin lets text2wave finish
            drop(stdin);
        }

        let output = tokio::time::timeout(SYNTHESIS_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| Error::Tts("synthesis timed out".to_string()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Tts(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[async_trait(?Send)]
impl SpeechSynthesizer for FestivalSynthesizer {
    async fn speak(&mut self, text: &str, volume: u8) -> Result<()> {
        tracing::info!(text, volume, "speaking");

        let wav = tempfile::Builder::new()
            .prefix("jasper_tts_")
            .suffix(".wav")
            .tempfile()?;

        self.synthesize(text, wav.path()).await?;

        let (mut samples, sample_rate) = read_wav(wav.path())?;
        apply_volume(&mut samples, volume);

        let device = self.output_device.clone();
        tokio::task::spawn_blocking(move || play_blocking(&device, samples, sample_rate))
            .await
            .map_err(|e| Error::Tts(format!("playback task failed: {e}")))??;

        Ok(())
    }

    fn update_config(&mut self, config: &RuntimeConfig) {
        self.output_device.clone_from(&config.output_device);
    }
}

/// Decode a WAV file to mono f32 samples
///
/// # Errors
///
/// Returns error if the file is missing or not a PCM WAV
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| {
                    #[allow(clippy::cast_precision_loss)]
                    let v = v as f32;
                    v / scale
                }))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok((mono, spec.sample_rate))
}
