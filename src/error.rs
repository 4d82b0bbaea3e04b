//! Error types for Jasper

use thiserror::Error;

/// Result type alias for Jasper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice front end
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Audio hardware missing or unusable
    #[error("device unavailable: {0}")]
    Device(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Inference service error
    #[error("inference error: {0}")]
    Inference(String),

    /// Conversation history persistence error
    #[error("history error: {0}")]
    History(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML encoding error
    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}
