//! Voice-activity-gated command capture
//!
//! After a wake event, frames are read until either the overall limit is
//! reached or speech has started and a run of trailing silence exceeds the
//! silence budget. Leading silence is never buffered.

use std::time::Duration;

use super::frame::{AudioFrame, FrameSource, RECORD_FRAME_MS, UtteranceBuffer, frame_len, samples_duration};
use super::vad::VoiceActivity;

/// Pause before retrying a failed frame read
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Captures one spoken command
pub struct CommandRecorder {
    vad: Box<dyn VoiceActivity>,
    frame_ms: u32,
    retry_backoff: Duration,
}

impl CommandRecorder {
    #[must_use]
    pub fn new(vad: Box<dyn VoiceActivity>) -> Self {
        Self {
            vad,
            frame_ms: RECORD_FRAME_MS,
            retry_backoff: READ_RETRY_BACKOFF,
        }
    }

    /// Override the pause before a read retry
    #[must_use]
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn set_aggressiveness(&mut self, level: u8) {
        self.vad.set_aggressiveness(level);
    }

    /// Record a command from `source`
    ///
    /// Returns `None` when no speech was observed before `max_duration`, or
    /// when the stream failed twice in a row. The returned buffer never spans
    /// more than `max_duration` of audio.
    #[allow(clippy::future_not_send)]
    pub async fn record(
        &mut self,
        source: &mut dyn FrameSource,
        max_duration: Duration,
        silence_timeout: Duration,
    ) -> Option<UtteranceBuffer> {
        let sample_rate = source.sample_rate();
        let len = frame_len(sample_rate, self.frame_ms).max(1);
        let frame_duration = samples_duration(len, sample_rate);
        let silence_budget = silence_frames(silence_timeout, frame_duration);

        let mut buffer = UtteranceBuffer::new(sample_rate);
        let mut elapsed = Duration::ZERO;
        let mut speech_started = false;
        let mut silent_run = 0usize;

        tracing::info!(
            max_ms = max_duration.as_millis(),
            silence_ms = silence_timeout.as_millis(),
            "recording command"
        );

        while elapsed + frame_duration <= max_duration {
            let samples = self.read_with_retry(source, len).await?;
            elapsed += frame_duration;

            let is_speech = self
                .vad
                .is_speech(&samples, sample_rate)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "voice activity check failed");
                    false
                });

            if is_speech {
                speech_started = true;
                silent_run = 0;
            } else if speech_started {
                silent_run += 1;
            } else {
                continue;
            }

            buffer.push(AudioFrame { samples, is_speech });

            if silent_run > silence_budget {
                tracing::debug!(silent_frames = silent_run, "trailing silence reached");
                break;
            }
        }

        if !speech_started {
            tracing::info!(elapsed_ms = elapsed.as_millis(), "no speech before timeout");
            return None;
        }

        tracing::info!(
            frames = buffer.frames().len(),
            duration_ms = buffer.duration().as_millis(),
            "command recorded"
        );
        Some(buffer)
    }

    #[allow(clippy::future_not_send)]
    async fn read_with_retry(&self, source: &mut dyn FrameSource, len: usize) -> Option<Vec<f32>> {
        match source.read_frame(len).await {
            Ok(samples) => Some(samples),
            Err(e) => {
                tracing::warn!(error = %e, "error reading audio, retrying");
                tokio::time::sleep(self.retry_backoff).await;
                match source.read_frame(len).await {
                    Ok(samples) => Some(samples),
                    Err(e) => {
                        tracing::error!(error = %e, "error recording audio, abandoning command");
                        None
                    }
                }
            }
        }
    }
}

/// Frames of silence tolerated after speech
fn silence_frames(silence_timeout: Duration, frame_duration: Duration) -> usize {
    if frame_duration.is_zero() {
        return 0;
    }
    usize::try_from(silence_timeout.as_micros() / frame_duration.as_micros()).unwrap_or(usize::MAX)
}
