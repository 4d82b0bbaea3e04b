//! Voice processing module
//!
//! Handles audio capture, wake word detection, command recording,
//! transcription, synthesis, and playback.

mod capture;
mod device;
mod frame;
mod playback;
mod recorder;
mod resample;
mod stt;
mod tts;
mod vad;
mod wake_word;

pub use capture::CpalCapture;
pub use device::{
    CpalDeviceProbe, DeviceProbe, choose_config, find_input_device, find_output_device,
    list_devices,
};
pub use frame::{
    AudioFrame, FrameSource, RECORD_FRAME_MS, UtteranceBuffer, WAKE_FRAME_MS, calculate_energy,
    frame_len, samples_duration, samples_to_wav,
};
pub use playback::{apply_volume, play_blocking};
pub use recorder::CommandRecorder;
pub use resample::{StreamResampler, resample};
pub use stt::{Transcriber, WhisperTranscriber};
pub use tts::{FestivalSynthesizer, SpeechSynthesizer, read_wav};
pub use vad::{EnergyVad, VoiceActivity};
pub use wake_word::{EnergyScorer, WakeScorer, WakeWordGate};
