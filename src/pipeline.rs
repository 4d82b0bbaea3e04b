//! Interaction pipeline
//!
//! A single sequential loop: listen for the wake phrase, record a command,
//! transcribe it, query the model, speak the reply. Config reloads and device
//! re-probes are elapsed-time checks made at the top of the listening and idle
//! loops, never concurrently with capture. At most one cycle is in flight.
//!
//! ```text
//!  DISABLED ──enabled──▶ LISTENING ──wake──▶ RECORDING ──transcript──▶ PROCESSING
//!     ▲                   ▲     │                 │                         │
//!     │                   │     └─probe fails─▶ DEVICE_UNAVAILABLE          ▼
//!     └──enabled=false────┴────────────── cycle ends ◀─────────────── SPEAKING
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::{ConfigStore, Reload, RuntimeConfig};
use crate::history::ConversationHistory;
use crate::inference::{CONTEXT_TURNS, InferenceClient, InferenceReply, build_prompt};
use crate::shutdown::ShutdownFlag;
use crate::voice::{
    CommandRecorder, DeviceProbe, FrameSource, SpeechSynthesizer, Transcriber, VoiceActivity,
    WAKE_FRAME_MS, WakeScorer, WakeWordGate, frame_len,
};

/// How often the persisted config is re-read
pub const RELOAD_INTERVAL: Duration = Duration::from_secs(5);

/// How often missing hardware is re-probed
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Longest single sleep while idle, bounding shutdown latency
const IDLE_TICK: Duration = Duration::from_millis(500);

/// Pause after a failed frame read while listening
const READ_FAILURE_BACKOFF: Duration = Duration::from_millis(100);

/// Consecutive read failures that prompt an immediate device re-probe
const MAX_READ_FAILURES: u32 = 10;

/// Pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// `enabled=false` in the config
    Disabled,
    /// No usable input device; re-probed periodically
    DeviceUnavailable,
    /// Feeding frames to the wake gate
    Listening,
    /// Capturing a command
    Recording,
    /// Transcribed command accepted, querying the model
    Processing,
    /// Playing the reply
    Speaking,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "DISABLED"),
            Self::DeviceUnavailable => write!(f, "DEVICE_UNAVAILABLE"),
            Self::Listening => write!(f, "LISTENING"),
            Self::Recording => write!(f, "RECORDING"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Speaking => write!(f, "SPEAKING"),
        }
    }
}

impl PipelineState {
    /// Whether the state belongs to a wake→speak cycle
    #[must_use]
    pub const fn in_cycle(self) -> bool {
        matches!(self, Self::Recording | Self::Processing | Self::Speaking)
    }

    /// Returns whether transitioning from `self` to `next` is valid
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disabled, Self::DeviceUnavailable)
                | (Self::DeviceUnavailable, Self::Listening)
                | (Self::Listening, Self::DeviceUnavailable)
                | (Self::Listening, Self::Recording)
                | (Self::Recording, Self::Processing)
                | (Self::Processing, Self::Speaking)
                // Cycle end, recoverable error, or re-enable
                | (_, Self::Listening)
                | (_, Self::Disabled)
        )
    }
}

/// Accept a transcript only if it mentions the wake phrase
///
/// Guards against false wake triggers turning ambient speech into queries.
#[must_use]
pub fn accepts_command(transcript: &str, wake_phrase: &str) -> bool {
    transcript
        .to_lowercase()
        .contains(&wake_phrase.trim().to_lowercase())
}

/// Counters for what the pipeline has done since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Wake events that started a cycle
    pub cycles: u64,
    /// Cycles that ended without a recorded command
    pub empty_recordings: u64,
    /// Transcripts rejected for missing the wake phrase
    pub rejected: u64,
    /// Inference queries sent
    pub queries: u64,
    /// Queries that degraded to a fallback reply
    pub fallbacks: u64,
    /// Config reloads that changed the snapshot
    pub config_changes: u64,
}

/// External capabilities the pipeline drives
pub struct PipelineParts {
    pub source: Box<dyn FrameSource>,
    pub scorer: Box<dyn WakeScorer>,
    pub vad: Box<dyn VoiceActivity>,
    pub transcriber: Box<dyn Transcriber>,
    pub inference: Box<dyn InferenceClient>,
    pub synthesizer: Box<dyn SpeechSynthesizer>,
    pub probe: Box<dyn DeviceProbe>,
    pub clock: Box<dyn Clock>,
}

/// The interaction state machine
///
/// Not `Send`: it owns the audio stream, so it runs on the task that built it.
pub struct InteractionPipeline {
    state: PipelineState,
    store: ConfigStore,
    config: Arc<RuntimeConfig>,
    history: ConversationHistory,
    source: Box<dyn FrameSource>,
    gate: WakeWordGate,
    recorder: CommandRecorder,
    transcriber: Box<dyn Transcriber>,
    inference: Box<dyn InferenceClient>,
    synthesizer: Box<dyn SpeechSynthesizer>,
    probe: Box<dyn DeviceProbe>,
    clock: Box<dyn Clock>,
    shutdown: ShutdownFlag,
    last_reload: Instant,
    last_probe: Instant,
    read_failures: u32,
    started: bool,
    stats: PipelineStats,
}

#[allow(clippy::future_not_send)]
impl InteractionPipeline {
    /// Assemble a pipeline around the current config snapshot
    #[must_use]
    pub fn new(
        store: ConfigStore,
        history: ConversationHistory,
        parts: PipelineParts,
        shutdown: ShutdownFlag,
    ) -> Self {
        let config = store.current();
        let now = parts.clock.now();

        let mut pipeline = Self {
            state: PipelineState::Disabled,
            store,
            config: Arc::clone(&config),
            history,
            source: parts.source,
            gate: WakeWordGate::new(parts.scorer, config.wake_threshold),
            recorder: CommandRecorder::new(parts.vad),
            transcriber: parts.transcriber,
            inference: parts.inference,
            synthesizer: parts.synthesizer,
            probe: parts.probe,
            clock: parts.clock,
            shutdown,
            last_reload: now,
            last_probe: now,
            read_failures: 0,
            started: false,
            stats: PipelineStats::default(),
        };
        pipeline.propagate_config();
        pipeline.trim_history();
        pipeline
    }

    #[must_use]
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    #[must_use]
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    #[must_use]
    pub const fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Config snapshot currently in effect
    #[must_use]
    pub fn config(&self) -> Arc<RuntimeConfig> {
        Arc::clone(&self.config)
    }

    /// Run until the shutdown flag is observed
    pub async fn run(&mut self) {
        tracing::info!("interaction pipeline starting");

        while !self.shutdown.is_triggered() {
            self.step().await;
        }

        self.source.suspend();
        tracing::info!(
            cycles = self.stats.cycles,
            queries = self.stats.queries,
            "interaction pipeline stopped"
        );
    }

    /// One iteration of the main loop
    pub async fn step(&mut self) {
        if !self.started {
            self.started = true;
            self.enter_initial_state();
            return;
        }

        match self.state {
            PipelineState::Disabled | PipelineState::DeviceUnavailable => self.idle().await,
            PipelineState::Listening => {
                if self.listen().await {
                    self.run_cycle().await;
                }
            }
            state => {
                // Cycles always finish in LISTENING; anything else is stale
                debug_assert!(state.in_cycle());
                tracing::warn!(%state, "recovering from interrupted cycle");
                self.transition(PipelineState::Listening);
            }
        }
    }

    fn enter_initial_state(&mut self) {
        let now = self.clock.now();
        self.last_reload = now;

        if !self.config.enabled {
            tracing::info!("jasper is disabled, waiting");
            self.transition(PipelineState::Disabled);
            return;
        }

        if self.probe_device() {
            self.transition(PipelineState::Listening);
        } else {
            self.transition(PipelineState::DeviceUnavailable);
        }
    }

    fn transition(&mut self, next: PipelineState) {
        let current = self.state;
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            tracing::warn!(from = %current, to = %next, "unexpected state transition");
        }

        tracing::info!(from = %current, to = %next, "state transition");
        self.state = next;

        match next {
            PipelineState::Disabled | PipelineState::DeviceUnavailable => self.source.suspend(),
            PipelineState::Listening => {
                self.gate.reset();
                self.source.discard_pending();
                self.read_failures = 0;
            }
            _ => {}
        }
    }

    /// Wait in DISABLED or DEVICE_UNAVAILABLE until maintenance is due
    async fn idle(&mut self) {
        let now = self.clock.now();
        let mut wait = RELOAD_INTERVAL.saturating_sub(now.saturating_duration_since(self.last_reload));
        if self.state == PipelineState::DeviceUnavailable {
            let until_probe =
                PROBE_INTERVAL.saturating_sub(now.saturating_duration_since(self.last_probe));
            wait = wait.min(until_probe);
        }

        self.clock.sleep(wait.min(IDLE_TICK)).await;
        self.maintain();
    }

    /// Reload config and re-probe hardware when due
    fn maintain(&mut self) {
        let now = self.clock.now();

        if now.saturating_duration_since(self.last_reload) >= RELOAD_INTERVAL {
            self.reload_config();
        }

        if self.state == PipelineState::DeviceUnavailable
            && now.saturating_duration_since(self.last_probe) >= PROBE_INTERVAL
            && self.probe_device()
        {
            tracing::info!("audio hardware available again");
            self.transition(PipelineState::Listening);
        }
    }

    fn reload_config(&mut self) {
        self.last_reload = self.clock.now();

        if let Reload::Changed { previous } = self.store.reload() {
            self.config = self.store.current();
            self.stats.config_changes += 1;
            self.log_config_changes(&previous);
            self.propagate_config();
            if self.config.max_turns < previous.max_turns {
                self.trim_history();
            }
        }

        match (self.state, self.config.enabled) {
            (PipelineState::Disabled, true) => {
                tracing::info!("jasper enabled");
                if self.probe_device() {
                    self.transition(PipelineState::Listening);
                } else {
                    self.transition(PipelineState::DeviceUnavailable);
                }
            }
            (PipelineState::Disabled, false) | (_, true) => {}
            (_, false) => {
                tracing::info!("jasper disabled by configuration");
                self.transition(PipelineState::Disabled);
            }
        }
    }

    fn log_config_changes(&self, previous: &RuntimeConfig) {
        let config = &self.config;
        if config.inference_changed(previous) {
            tracing::info!(url = %config.inference_url(), model = %config.model, "inference endpoint changed");
        }
        if config.volume() != previous.volume() {
            tracing::info!(volume = config.volume(), "volume changed");
        }
        if config.capture_changed(previous) {
            tracing::info!(
                device = %config.input_device,
                sample_rate = config.sample_rate,
                "capture settings changed"
            );
        }
    }

    /// Push the current snapshot into every component
    fn propagate_config(&mut self) {
        let config = Arc::clone(&self.config);
        self.inference.update_config(&config);
        self.transcriber.update_config(&config);
        self.synthesizer.update_config(&config);
        self.source.update_config(&config);
        self.probe.update_config(&config);
        self.gate.set_threshold(config.wake_threshold);
        self.recorder.set_aggressiveness(config.vad_aggressiveness);
    }

    /// Hold history to the current retention bound between appends
    fn trim_history(&mut self) {
        match self.history.trim(self.config.max_turns) {
            Ok(0) => {}
            Ok(evicted) => tracing::info!(
                evicted,
                max_turns = self.config.max_turns,
                "conversation history trimmed to retention bound"
            ),
            Err(e) => tracing::error!(error = %e, "failed to save conversation history"),
        }
    }

    fn probe_device(&mut self) -> bool {
        self.last_probe = self.clock.now();
        let available = self.probe.input_available();
        if !available {
            tracing::error!(
                retry_secs = PROBE_INTERVAL.as_secs(),
                "jasper requires an audio input device; none is available"
            );
        }
        available
    }

    /// Poll frames until the wake phrase fires
    ///
    /// Returns false when listening stopped for another reason (shutdown,
    /// disable, lost device).
    async fn listen(&mut self) -> bool {
        tracing::info!("listening for wake word");

        loop {
            if self.shutdown.is_triggered() {
                return false;
            }

            self.maintain();
            if self.state != PipelineState::Listening {
                return false;
            }

            let len = frame_len(self.source.sample_rate(), WAKE_FRAME_MS).max(1);
            match self.source.read_frame(len).await {
                Ok(frame) => {
                    self.read_failures = 0;
                    if self.gate.detect(&frame) {
                        self.transition(PipelineState::Recording);
                        return true;
                    }
                }
                Err(e) => {
                    self.read_failures += 1;
                    tracing::error!(error = %e, failures = self.read_failures, "error reading audio");

                    if self.read_failures >= MAX_READ_FAILURES {
                        self.read_failures = 0;
                        if !self.probe_device() {
                            self.transition(PipelineState::DeviceUnavailable);
                            return false;
                        }
                    }
                    self.clock.sleep(READ_FAILURE_BACKOFF).await;
                }
            }
        }
    }

    /// Record → transcribe → query → speak, then back to LISTENING
    async fn run_cycle(&mut self) {
        self.stats.cycles += 1;
        // The whole cycle runs against the snapshot in effect at wake time
        let config = Arc::clone(&self.config);

        let utterance = self
            .recorder
            .record(
                self.source.as_mut(),
                config.command_timeout(),
                config.silence_timeout(),
            )
            .await;

        let Some(utterance) = utterance else {
            tracing::info!("no command recorded");
            self.stats.empty_recordings += 1;
            self.transition(PipelineState::Listening);
            return;
        };

        let transcript = match self.transcriber.transcribe(&utterance).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                String::new()
            }
        };
        drop(utterance);

        if transcript.is_empty() {
            tracing::info!("no speech recognized");
            self.transition(PipelineState::Listening);
            return;
        }

        if !accepts_command(&transcript, &config.wake_phrase) {
            tracing::info!(
                transcript = %transcript,
                wake_phrase = %config.wake_phrase,
                "command ignored, wake phrase not in transcript"
            );
            self.stats.rejected += 1;
            self.transition(PipelineState::Listening);
            return;
        }

        self.transition(PipelineState::Processing);
        let reply = self.query(&transcript, &config).await;
        self.record_exchange(&transcript, &reply, &config);

        if reply.text.is_empty() {
            tracing::info!("empty response, nothing to speak");
            self.transition(PipelineState::Listening);
            return;
        }

        self.transition(PipelineState::Speaking);
        if let Err(e) = self.synthesizer.speak(&reply.text, config.volume()).await {
            tracing::error!(error = %e, "text-to-speech failed");
        }

        self.transition(PipelineState::Listening);
    }

    async fn query(&mut self, transcript: &str, config: &RuntimeConfig) -> InferenceReply {
        let prompt = if config.history_enabled {
            build_prompt(self.history.recent(CONTEXT_TURNS), transcript)
        } else {
            build_prompt([], transcript)
        };

        self.stats.queries += 1;
        let reply = self.inference.query(&prompt).await;
        if reply.degraded {
            self.stats.fallbacks += 1;
        }
        reply
    }

    fn record_exchange(&mut self, transcript: &str, reply: &InferenceReply, config: &RuntimeConfig) {
        if !config.history_enabled {
            return;
        }
        if reply.degraded && !config.record_fallback_replies {
            tracing::debug!("fallback reply not recorded");
            return;
        }

        if let Err(e) = self
            .history
            .record_exchange(transcript, &reply.text, config.max_turns)
        {
            tracing::error!(error = %e, "failed to save conversation history");
        }
    }
}
