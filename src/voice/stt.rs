//! Speech-to-text (STT) processing

use std::time::Duration;

use async_trait::async_trait;

use super::frame::UtteranceBuffer;
use crate::config::RuntimeConfig;
use crate::{Error, Result};

/// Upper bound on a transcription request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Turns a recorded utterance into text
#[async_trait(?Send)]
pub trait Transcriber {
    /// Best-effort transcript, possibly empty
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot be reached or fails
    async fn transcribe(&self, utterance: &UtteranceBuffer) -> Result<String>;

    /// Pick up endpoint or model changes
    fn update_config(&mut self, _config: &RuntimeConfig) {}
}

/// Response from a Whisper-compatible transcription endpoint
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes through a Whisper-compatible HTTP endpoint
///
/// Works with a local `whisper.cpp` server (`/inference`) or any
/// `/v1/audio/transcriptions` implementation.
pub struct WhisperTranscriber {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl WhisperTranscriber {
    /// Create a transcriber for `url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty or the HTTP client cannot be built
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(Error::Config("STT endpoint URL required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            url,
            model: model.into(),
        })
    }

    /// Create a transcriber from the runtime config
    ///
    /// A blank `stt_url` falls back to the default endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        let url = if config.stt_url.trim().is_empty() {
            let fallback = RuntimeConfig::default().stt_url;
            tracing::warn!(url = %fallback, "empty STT endpoint URL, using default");
            fallback
        } else {
            config.stt_url.clone()
        };
        Self::new(url, config.stt_model.clone())
    }
}

#[async_trait(?Send)]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, utterance: &UtteranceBuffer) -> Result<String> {
        let audio = utterance.to_wav()?;
        tracing::debug!(audio_bytes = audio.len(), url = %self.url, "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("response_format", "json");

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription endpoint error");
            return Err(Error::Stt(format!("transcription error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            e
        })?;

        let text = result.text.trim().to_string();
        tracing::info!(transcript = %text, "transcribed");
        Ok(text)
    }

    fn update_config(&mut self, config: &RuntimeConfig) {
        if config.stt_url.trim().is_empty() {
            tracing::warn!("ignoring empty STT endpoint URL");
            return;
        }
        self.url.clone_from(&config.stt_url);
        self.model.clone_from(&config.stt_model);
    }
}
