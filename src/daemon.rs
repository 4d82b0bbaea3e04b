//! Daemon - the main Jasper service
//!
//! Wires the real capture, wake word, transcription, inference and speech
//! adapters into the interaction pipeline and runs it until a shutdown signal.

use std::path::PathBuf;

use crate::clock::SystemClock;
use crate::config::ConfigStore;
use crate::history::ConversationHistory;
use crate::inference::OllamaClient;
use crate::logs::spawn_pruning;
use crate::pipeline::{InteractionPipeline, PipelineParts};
use crate::shutdown::ShutdownFlag;
use crate::voice::{
    CpalCapture, CpalDeviceProbe, EnergyScorer, EnergyVad, FestivalSynthesizer, WakeScorer,
    WhisperTranscriber,
};
use crate::Result;

/// History file name inside the data directory
pub const HISTORY_FILE: &str = "conversation_history.json";

/// The Jasper daemon
#[derive(Debug, Clone)]
pub struct Daemon {
    config_path: PathBuf,
    data_dir: PathBuf,
    log_dir: PathBuf,
    active_log: Option<PathBuf>,
}

impl Daemon {
    /// Create a new daemon instance
    #[must_use]
    pub fn new(config_path: PathBuf, data_dir: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            config_path,
            data_dir,
            log_dir,
            active_log: None,
        }
    }

    /// Exempt this process's own log file from pruning
    #[must_use]
    pub fn with_active_log(mut self, path: Option<PathBuf>) -> Self {
        self.active_log = path;
        self
    }

    /// Path of the persisted conversation history
    #[must_use]
    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    /// Build the pipeline from the real adapters
    ///
    /// # Errors
    ///
    /// Returns error if an HTTP client cannot be built
    pub fn build_pipeline(&self, shutdown: ShutdownFlag) -> Result<InteractionPipeline> {
        let store = ConfigStore::open(&self.config_path);
        let config = store.current();

        std::fs::create_dir_all(&self.data_dir)?;
        let history = ConversationHistory::load(self.history_path());
        tracing::info!(
            path = %self.history_path().display(),
            turns = history.len(),
            "conversation history loaded"
        );

        let synthesizer = FestivalSynthesizer::new(&config.output_device);
        if !synthesizer.is_installed() {
            tracing::warn!("text2wave not found on PATH; spoken replies will fail");
        }

        let scorer = EnergyScorer::new(&config.wake_phrase);
        if scorer.is_placeholder() {
            tracing::warn!(
                wake_phrase = %config.wake_phrase,
                "wake scorer is an energy placeholder; any sustained loud sound will wake jasper"
            );
        }

        let parts = PipelineParts {
            source: Box::new(CpalCapture::new(&config.input_device, config.sample_rate)),
            scorer: Box::new(scorer),
            vad: Box::new(EnergyVad::new(config.vad_aggressiveness)),
            transcriber: Box::new(WhisperTranscriber::from_config(&config)?),
            inference: Box::new(OllamaClient::new(&config)?),
            synthesizer: Box::new(synthesizer),
            probe: Box::new(CpalDeviceProbe::new(&config.input_device, config.sample_rate)),
            clock: Box::new(SystemClock),
        };

        Ok(InteractionPipeline::new(store, history, parts, shutdown))
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the daemon cannot start
    #[allow(clippy::future_not_send)]
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            config = %self.config_path.display(),
            data_dir = %self.data_dir.display(),
            log_dir = %self.log_dir.display(),
            "daemon starting"
        );

        let shutdown = ShutdownFlag::new();
        shutdown.install_signal_handlers();

        let pruning = spawn_pruning(
            self.log_dir.clone(),
            self.config_path.clone(),
            self.active_log.clone(),
            shutdown.clone(),
        );

        let mut pipeline = self.build_pipeline(shutdown)?;
        pipeline.run().await;

        pruning.abort();
        tracing::info!("daemon stopped");
        Ok(())
    }
}
