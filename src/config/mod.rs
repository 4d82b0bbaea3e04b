//! Runtime configuration for Jasper
//!
//! The persisted config file is the single source of truth. The daemon never
//! writes its in-memory snapshot back; it re-reads the file on a fixed cadence
//! and replaces the snapshot wholesale when it changed.

pub mod file;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

pub use file::{ConfigFormat, default_config_path, default_data_dir, default_log_dir};

/// Hot-reloadable settings shared by every pipeline component
///
/// Field names on disk follow the keys the dashboard writes
/// (`ollama_server`, `conversation_history_enabled`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Master switch for the interaction loop
    pub enabled: bool,

    /// Inference service host
    #[serde(rename = "ollama_server")]
    pub inference_host: String,

    /// Inference service port
    #[serde(rename = "ollama_port")]
    pub inference_port: u16,

    /// Model name sent with every query
    #[serde(rename = "ollama_model")]
    pub model: String,

    /// Playback volume, always within 0..=100
    #[serde(deserialize_with = "deserialize_volume")]
    volume: u8,

    /// Record exchanges into conversation history
    #[serde(rename = "conversation_history_enabled")]
    pub history_enabled: bool,

    /// Retained turn pairs (history holds at most twice this many entries)
    #[serde(rename = "max_conversation_turns")]
    pub max_turns: usize,

    /// Wake phrase; transcripts must contain it to be accepted
    #[serde(rename = "wake_word")]
    pub wake_phrase: String,

    /// Score a wake label must exceed to fire
    pub wake_threshold: f32,

    /// Voice activity aggressiveness (0 = permissive, 3 = strict)
    pub vad_aggressiveness: u8,

    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Input device selector (`default` or a device name)
    #[serde(rename = "audio_input_device")]
    pub input_device: String,

    /// Output device selector (`default` or a device name)
    #[serde(rename = "audio_output_device")]
    pub output_device: String,

    /// Overall command recording limit
    pub command_timeout_secs: u64,

    /// Trailing silence that ends a command
    pub silence_timeout_ms: u64,

    /// Whisper-compatible transcription endpoint
    pub stt_url: String,

    /// Model name passed to the transcription endpoint
    pub stt_model: String,

    /// Record apology replies from a failed query into history
    pub record_fallback_replies: bool,

    /// Total size cap for the log directory
    pub log_max_size_mb: u64,

    /// Age cap for individual log files
    pub log_retention_days: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            inference_host: "localhost".to_string(),
            inference_port: 11434,
            model: "llama2".to_string(),
            volume: 75,
            history_enabled: true,
            max_turns: 10,
            wake_phrase: "jasper".to_string(),
            wake_threshold: 0.5,
            vad_aggressiveness: 3,
            sample_rate: 16000,
            input_device: "default".to_string(),
            output_device: "default".to_string(),
            command_timeout_secs: 10,
            silence_timeout_ms: 900,
            stt_url: "http://localhost:8080/inference".to_string(),
            stt_model: "whisper-1".to_string(),
            record_fallback_replies: true,
            log_max_size_mb: 2048,
            log_retention_days: 30,
        }
    }
}

impl RuntimeConfig {
    /// Playback volume (0-100)
    #[must_use]
    pub const fn volume(&self) -> u8 {
        self.volume
    }

    /// Set playback volume, clamping into 0..=100
    pub fn set_volume(&mut self, volume: i64) {
        self.volume = clamp_volume(volume);
    }

    /// Bring every field into its valid range
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.volume = self.volume.min(100);
        self.vad_aggressiveness = self.vad_aggressiveness.min(3);
        self.wake_threshold = if self.wake_threshold.is_finite() {
            self.wake_threshold.clamp(0.0, 1.0)
        } else {
            0.5
        };
        self.max_turns = self.max_turns.max(1);
        if self.sample_rate == 0 {
            self.sample_rate = 16000;
        }
        self.wake_phrase = match self.wake_phrase.trim() {
            "" => Self::default().wake_phrase,
            phrase => phrase.to_string(),
        };
        self
    }

    /// Base URL of the inference service
    #[must_use]
    pub fn inference_url(&self) -> String {
        format!("http://{}:{}", self.inference_host, self.inference_port)
    }

    /// Overall command recording limit
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Trailing silence that ends a command
    #[must_use]
    pub const fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }

    /// Whether the endpoint or model differ from `other`
    #[must_use]
    pub fn inference_changed(&self, other: &Self) -> bool {
        self.inference_host != other.inference_host
            || self.inference_port != other.inference_port
            || self.model != other.model
    }

    /// Whether capture hardware settings differ from `other`
    #[must_use]
    pub fn capture_changed(&self, other: &Self) -> bool {
        self.sample_rate != other.sample_rate || self.input_device != other.input_device
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_volume(volume: i64) -> u8 {
    volume.clamp(0, 100) as u8
}

#[allow(clippy::cast_possible_truncation)]
fn deserialize_volume<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if raw.is_nan() {
        return Ok(0);
    }
    Ok(clamp_volume(raw.round().clamp(-1.0, 101.0) as i64))
}

/// Outcome of a reload attempt
#[derive(Debug, Clone)]
pub enum Reload {
    /// The stored record matches the current snapshot
    Unchanged,
    /// The snapshot was replaced; carries the one it replaced
    Changed {
        /// Snapshot in effect before the reload
        previous: Arc<RuntimeConfig>,
    },
    /// The file could not be read; the previous snapshot is kept
    Failed,
}

/// In-memory mirror of the persisted configuration
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    current: Arc<RuntimeConfig>,
}

impl ConfigStore {
    /// Load the config at `path`, falling back to defaults when unreadable
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match file::read_config(&path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "configuration loaded");
                config
            }
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "failed to load config, using defaults"
                );
                RuntimeConfig::default()
            }
        };

        Self {
            path,
            current: Arc::new(current),
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn current(&self) -> Arc<RuntimeConfig> {
        Arc::clone(&self.current)
    }

    /// Re-read the persisted record and swap the snapshot if it changed
    pub fn reload(&mut self) -> Reload {
        match file::read_config(&self.path) {
            Ok(config) if config == *self.current => Reload::Unchanged,
            Ok(config) => {
                let previous = std::mem::replace(&mut self.current, Arc::new(config));
                tracing::info!(path = %self.path.display(), "configuration changed");
                Reload::Changed { previous }
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "config reload failed, keeping previous snapshot"
                );
                Reload::Failed
            }
        }
    }
}
