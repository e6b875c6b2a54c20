//! Voice processing module
//!
//! Handles audio capture, voice activity detection, wake word detection,
//! transcription, speech rendering and playback.

pub mod capture;
pub mod clip;
#[cfg(feature = "rustpotter")]
pub mod keyword;
pub mod playback;
pub mod recorder;
pub mod stt;
pub mod synthesizer;
pub mod tts;
pub mod vad;
pub mod wake_word;

pub use capture::{AudioInput, FrameSource, Microphone};
pub use clip::{AudioClip, SAMPLE_RATE};
#[cfg(feature = "rustpotter")]
pub use keyword::KeywordEngine;
pub use playback::AudioPlayback;
pub use recorder::{SpeechRecorder, UtteranceSource};
pub use stt::{RemoteTranscriber, Transcriber};
pub use synthesizer::{SpeechSynthesizer, Spoken};
pub use tts::{RemoteVoice, SpeechRenderer, SystemVoice};
pub use vad::{EnergyGate, VoiceActivityGate, WebRtcGate};
pub use wake_word::{TranscriptWakeEngine, WakeEngine, WakeSource, WakeWordListener};
