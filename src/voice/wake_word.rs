//! Wake word detection
//!
//! The gate feeds fixed-size frames to a scoring capability and fires when any
//! tracked label scores above the configured threshold.

use std::collections::{HashMap, VecDeque};

use super::frame::calculate_energy;
use crate::Result;

/// Scores frames against one or more wake labels
///
/// Implementations may keep a temporal window internally.
pub trait WakeScorer {
    /// Confidence in [0, 1] for each tracked label
    ///
    /// # Errors
    ///
    /// Returns error if scoring fails for this frame
    fn score(&mut self, frame: &[f32]) -> Result<HashMap<String, f32>>;

    /// Forget any temporal window
    fn reset(&mut self) {}

    /// True for scorers that react to loudness rather than the phrase itself
    fn is_placeholder(&self) -> bool {
        false
    }
}

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Frames in the scoring window (4 x 80 ms)
const WINDOW_FRAMES: usize = 4;

/// Scores sustained speech energy over a short window
///
/// Stand-in for a keyword-spotting model: the score is the fraction of recent
/// frames above the energy threshold, reported under the wake phrase label.
#[derive(Debug, Clone)]
pub struct EnergyScorer {
    label: String,
    window: VecDeque<bool>,
}

impl EnergyScorer {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            window: VecDeque::with_capacity(WINDOW_FRAMES),
        }
    }
}

impl WakeScorer for EnergyScorer {
    #[allow(clippy::cast_precision_loss)]
    fn score(&mut self, frame: &[f32]) -> Result<HashMap<String, f32>> {
        if self.window.len() == WINDOW_FRAMES {
            self.window.pop_front();
        }
        self.window.push_back(calculate_energy(frame) > ENERGY_THRESHOLD);

        let active = self.window.iter().filter(|&&loud| loud).count();
        let score = active as f32 / WINDOW_FRAMES as f32;

        Ok(HashMap::from([(self.label.clone(), score)]))
    }

    fn reset(&mut self) {
        self.window.clear();
    }

    fn is_placeholder(&self) -> bool {
        true
    }
}

/// Signals when the wake phrase is heard
pub struct WakeWordGate {
    scorer: Box<dyn WakeScorer>,
    threshold: f32,
}

impl WakeWordGate {
    #[must_use]
    pub fn new(scorer: Box<dyn WakeScorer>, threshold: f32) -> Self {
        Self { scorer, threshold }
    }

    /// Evaluate one frame
    ///
    /// Scoring failures are logged and count as a miss.
    pub fn detect(&mut self, frame: &[f32]) -> bool {
        let scores = match self.scorer.score(frame) {
            Ok(scores) => scores,
            Err(e) => {
                tracing::warn!(error = %e, "wake scoring failed");
                return false;
            }
        };

        for (label, score) in &scores {
            if *score > self.threshold {
                tracing::info!(label = %label, score = f64::from(*score), "wake word detected");
                return true;
            }
        }

        false
    }

    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    pub const fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    /// Reset the scorer window
    pub fn reset(&mut self) {
        self.scorer.reset();
    }
}
