//! Jasper - a local voice assistant daemon
//!
//! This library provides the core functionality for Jasper:
//! - Wake word gating over a live microphone stream
//! - Command recording with voice activity detection
//! - Transcription, local LLM inference and spoken replies
//! - Persisted, bounded conversation history
//! - Hot-reloaded configuration and log pruning
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Interaction Pipeline                 │
//! │  Listen → Record → Transcribe → Query → Speak       │
//! └────────────────────┬────────────────────────────────┘
//!                      │ capability traits
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Adapters                          │
//! │  cpal capture │ VAD │ Whisper │ Ollama │ Festival   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod clock;
pub mod config;
pub mod daemon;
pub mod error;
pub mod history;
pub mod inference;
pub mod logs;
pub mod pipeline;
pub mod shutdown;
pub mod voice;

pub use config::{ConfigStore, Reload, RuntimeConfig};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use history::{ConversationHistory, ConversationTurn, Role};
pub use inference::{InferenceClient, InferenceReply, OllamaClient};
pub use logs::LogRotator;
pub use pipeline::{InteractionPipeline, PipelineParts, PipelineState, PipelineStats};
pub use shutdown::ShutdownFlag;
