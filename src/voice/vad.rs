//! Voice activity detection

use super::frame::calculate_energy;
use crate::Result;

/// Classifies a frame as speech or non-speech
pub trait VoiceActivity {
    /// Whether `frame` contains speech
    ///
    /// # Errors
    ///
    /// Returns error if the frame cannot be classified
    fn is_speech(&mut self, frame: &[f32], sample_rate: u32) -> Result<bool>;

    /// Change how strictly frames are classified (0 = permissive, 3 = strict)
    fn set_aggressiveness(&mut self, _level: u8) {}
}

/// RMS thresholds per aggressiveness level
const ENERGY_THRESHOLDS: [f32; 4] = [0.005, 0.01, 0.02, 0.03];

/// Energy-gated voice activity detector
#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
    aggressiveness: u8,
}

impl EnergyVad {
    #[must_use]
    pub fn new(aggressiveness: u8) -> Self {
        let mut vad = Self {
            threshold: ENERGY_THRESHOLDS[3],
            aggressiveness: 3,
        };
        vad.set_aggressiveness(aggressiveness);
        vad
    }

    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    #[must_use]
    pub const fn aggressiveness(&self) -> u8 {
        self.aggressiveness
    }
}

impl VoiceActivity for EnergyVad {
    fn is_speech(&mut self, frame: &[f32], _sample_rate: u32) -> Result<bool> {
        Ok(calculate_energy(frame) > self.threshold)
    }

    fn set_aggressiveness(&mut self, level: u8) {
        let level = level.min(3);
        self.aggressiveness = level;
        self.threshold = ENERGY_THRESHOLDS[usize::from(level)];
    }
}
