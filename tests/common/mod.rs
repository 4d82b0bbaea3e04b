//! Shared test utilities
//!
//! Scripted stand-ins for every capability the pipeline drives. Frames carry a
//! constant level: the scorer reports the level as its wake confidence and the
//! VAD treats anything above 0.1 as speech.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;

use async_trait::async_trait;
use tempfile::TempDir;

use jasper::clock::ManualClock;
use jasper::config::file::write_config;
use jasper::inference::{InferenceClient, InferenceReply};
use jasper::voice::{
    DeviceProbe, FrameSource, SpeechSynthesizer, Transcriber, UtteranceBuffer, VoiceActivity,
    WakeScorer, calculate_energy, samples_duration,
};
use jasper::{
    ConfigStore, ConversationHistory, Error, InteractionPipeline, PipelineParts, Result,
    RuntimeConfig, ShutdownFlag,
};

pub const SAMPLE_RATE: u32 = 16000;

/// Frame level that fires the wake gate at the default threshold
pub const WAKE_LEVEL: f32 = 0.9;

/// Frame level the VAD classifies as speech
pub const SPEECH_LEVEL: f32 = 0.5;

/// One scripted frame-source event
pub enum Step {
    /// `n` frames at a constant level
    Level(f32, usize),
    /// `n` failed reads
    Fail(usize),
    /// Side effect run before the next read is served
    Call(Box<dyn FnOnce()>),
}

pub fn quiet(n: usize) -> Step {
    Step::Level(0.0, n)
}

pub fn speech(n: usize) -> Step {
    Step::Level(SPEECH_LEVEL, n)
}

pub fn wake() -> Step {
    Step::Level(WAKE_LEVEL, 1)
}

pub fn fail(n: usize) -> Step {
    Step::Fail(n)
}

/// A wake frame followed by a short command and enough trailing silence to end it
pub fn command() -> Vec<Step> {
    vec![wake(), speech(5), quiet(31)]
}

/// Frame source that replays a script and advances the clock per read
///
/// Once the script runs out it serves silence and requests shutdown.
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    clock: ManualClock,
    shutdown: ShutdownFlag,
    suspends: Rc<Cell<usize>>,
}

#[async_trait(?Send)]
impl FrameSource for ScriptedSource {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    async fn read_frame(&mut self, len: usize) -> Result<Vec<f32>> {
        self.clock.advance(samples_duration(len, SAMPLE_RATE));

        loop {
            match self.steps.pop_front() {
                Some(Step::Call(action)) => action(),
                Some(Step::Level(level, n)) => {
                    if n > 1 {
                        self.steps.push_front(Step::Level(level, n - 1));
                    }
                    if n > 0 {
                        return Ok(vec![level; len]);
                    }
                }
                Some(Step::Fail(n)) => {
                    if n > 1 {
                        self.steps.push_front(Step::Fail(n - 1));
                    }
                    if n > 0 {
                        return Err(Error::Audio("scripted read failure".to_string()));
                    }
                }
                None => {
                    self.shutdown.trigger();
                    return Ok(vec![0.0; len]);
                }
            }
        }
    }

    fn suspend(&mut self) {
        self.suspends.set(self.suspends.get() + 1);
    }
}

/// Reports the frame's peak level as the wake confidence
pub struct PeakScorer;

impl WakeScorer for PeakScorer {
    fn score(&mut self, frame: &[f32]) -> Result<HashMap<String, f32>> {
        let peak = frame.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        Ok(HashMap::from([("jasper".to_string(), peak)]))
    }
}

/// Energy VAD that remembers the aggressiveness it was given
pub struct LevelVad {
    aggressiveness: Rc<Cell<u8>>,
}

impl VoiceActivity for LevelVad {
    fn is_speech(&mut self, frame: &[f32], _sample_rate: u32) -> Result<bool> {
        Ok(calculate_energy(frame) > 0.1)
    }

    fn set_aggressiveness(&mut self, level: u8) {
        self.aggressiveness.set(level);
    }
}

/// Returns queued transcripts in order, empty once the queue is drained
pub struct ScriptedTranscriber {
    transcripts: Rc<RefCell<VecDeque<String>>>,
    utterances: Rc<RefCell<Vec<usize>>>,
}

#[async_trait(?Send)]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, utterance: &UtteranceBuffer) -> Result<String> {
        self.utterances.borrow_mut().push(utterance.sample_count());
        Ok(self.transcripts.borrow_mut().pop_front().unwrap_or_default())
    }
}

/// Records prompts and answers with a fixed reply
pub struct ScriptedInference {
    reply: Rc<RefCell<InferenceReply>>,
    prompts: Rc<RefCell<Vec<String>>>,
    endpoints: Rc<RefCell<Vec<String>>>,
}

#[async_trait(?Send)]
impl InferenceClient for ScriptedInference {
    async fn query(&self, prompt: &str) -> InferenceReply {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.reply.borrow().clone()
    }

    fn update_config(&mut self, config: &RuntimeConfig) {
        self.endpoints.borrow_mut().push(config.inference_url());
    }
}

/// Records what would have been spoken
pub struct RecordingSynthesizer {
    spoken: Rc<RefCell<Vec<(String, u8)>>>,
}

#[async_trait(?Send)]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn speak(&mut self, text: &str, volume: u8) -> Result<()> {
        self.spoken.borrow_mut().push((text.to_string(), volume));
        Ok(())
    }
}

/// Device probe toggled by the test
pub struct FakeProbe {
    available: Rc<Cell<bool>>,
    probes: Rc<Cell<usize>>,
}

impl DeviceProbe for FakeProbe {
    fn input_available(&self) -> bool {
        self.probes.set(self.probes.get() + 1);
        self.available.get()
    }
}

/// An enabled config with defaults otherwise
pub fn enabled_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.enabled = true;
    config
}

/// Owns the scratch directory and every handle a test inspects
pub struct Harness {
    pub dir: TempDir,
    pub clock: ManualClock,
    pub shutdown: ShutdownFlag,
    pub transcripts: Rc<RefCell<VecDeque<String>>>,
    pub utterances: Rc<RefCell<Vec<usize>>>,
    pub reply: Rc<RefCell<InferenceReply>>,
    pub prompts: Rc<RefCell<Vec<String>>>,
    pub endpoints: Rc<RefCell<Vec<String>>>,
    pub spoken: Rc<RefCell<Vec<(String, u8)>>>,
    pub device_available: Rc<Cell<bool>>,
    pub probes: Rc<Cell<usize>>,
    pub suspends: Rc<Cell<usize>>,
    pub vad_aggressiveness: Rc<Cell<u8>>,
}

impl Harness {
    pub fn new(config: &RuntimeConfig) -> Self {
        let harness = Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
            clock: ManualClock::new(),
            shutdown: ShutdownFlag::new(),
            transcripts: Rc::default(),
            utterances: Rc::default(),
            reply: Rc::new(RefCell::new(InferenceReply::answer("It is noon."))),
            prompts: Rc::default(),
            endpoints: Rc::default(),
            spoken: Rc::default(),
            device_available: Rc::new(Cell::new(true)),
            probes: Rc::default(),
            suspends: Rc::default(),
            vad_aggressiveness: Rc::default(),
        };
        harness.write_config(config);
        harness
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.path().join("conversation_history.json")
    }

    pub fn write_config(&self, config: &RuntimeConfig) {
        write_config(&self.config_path(), config).expect("failed to write config");
    }

    /// Step that rewrites the config file when the source reaches it
    pub fn config_change(&self, config: RuntimeConfig) -> Step {
        let path = self.config_path();
        Step::Call(Box::new(move || {
            write_config(&path, &config).expect("failed to write config");
        }))
    }

    pub fn queue_transcript(&self, text: &str) {
        self.transcripts.borrow_mut().push_back(text.to_string());
    }

    pub fn set_reply(&self, reply: InferenceReply) {
        *self.reply.borrow_mut() = reply;
    }

    /// Assemble a pipeline over the scripted capabilities
    pub fn pipeline(&self, script: Vec<Step>) -> InteractionPipeline {
        let parts = PipelineParts {
            source: Box::new(ScriptedSource {
                steps: script.into(),
                clock: self.clock.clone(),
                shutdown: self.shutdown.clone(),
                suspends: Rc::clone(&self.suspends),
            }),
            scorer: Box::new(PeakScorer),
            vad: Box::new(LevelVad {
                aggressiveness: Rc::clone(&self.vad_aggressiveness),
            }),
            transcriber: Box::new(ScriptedTranscriber {
                transcripts: Rc::clone(&self.transcripts),
                utterances: Rc::clone(&self.utterances),
            }),
            inference: Box::new(ScriptedInference {
                reply: Rc::clone(&self.reply),
                prompts: Rc::clone(&self.prompts),
                endpoints: Rc::clone(&self.endpoints),
            }),
            synthesizer: Box::new(RecordingSynthesizer {
                spoken: Rc::clone(&self.spoken),
            }),
            probe: Box::new(FakeProbe {
                available: Rc::clone(&self.device_available),
                probes: Rc::clone(&self.probes),
            }),
            clock: Box::new(self.clock.clone()),
        };

        InteractionPipeline::new(
            ConfigStore::open(self.config_path()),
            ConversationHistory::load(self.history_path()),
            parts,
            self.shutdown.clone(),
        )
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken.borrow().iter().map(|(text, _)| text.clone()).collect()
    }
}
