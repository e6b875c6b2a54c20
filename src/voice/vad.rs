//! Voice activity detection
//!
//! Per-frame speech/silence classification used by the recorder.

use webrtc_vad::{SampleRate, Vad, VadMode};

use super::clip::i16_to_f32;
use crate::config::{AudioConfig, VadKind};
use crate::{Error, Result};

/// Classifies one audio frame as speech or silence
pub trait VoiceActivityGate {
    /// # Errors
    ///
    /// Returns error if the frame has a length the detector cannot handle
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool>;
}

/// Build the gate selected in configuration
///
/// # Errors
///
/// Returns error if the WebRTC detector rejects the sample rate
pub fn from_config(audio: &AudioConfig) -> Result<Box<dyn VoiceActivityGate>> {
    match audio.vad {
        VadKind::WebRtc => Ok(Box::new(WebRtcGate::new(
            audio.sample_rate,
            audio.vad_aggressiveness,
        )?)),
        VadKind::Energy => Ok(Box::new(EnergyGate::new(audio.energy_threshold))),
    }
}

/// WebRTC VAD with aggressiveness 0 (least) to 3 (most)
pub struct WebRtcGate {
    vad: Vad,
}

impl WebRtcGate {
    /// # Errors
    ///
    /// Returns error for sample rates WebRTC VAD does not support
    pub fn new(sample_rate: u32, aggressiveness: u8) -> Result<Self> {
        let rate = match sample_rate {
            8_000 => SampleRate::Rate8kHz,
            16_000 => SampleRate::Rate16kHz,
            32_000 => SampleRate::Rate32kHz,
            48_000 => SampleRate::Rate48kHz,
            other => return Err(Error::Vad(format!("unsupported sample rate {other}"))),
        };
        let mode = match aggressiveness {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            _ => VadMode::VeryAggressive,
        };

        tracing::debug!(sample_rate, aggressiveness, "webrtc vad initialized");
        Ok(Self {
            vad: Vad::new_with_rate_and_mode(rate, mode),
        })
    }
}

impl VoiceActivityGate for WebRtcGate {
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool> {
        self.vad
            .is_voice_segment(frame)
            .map_err(|()| Error::Vad(format!("invalid frame length {}", frame.len())))
    }
}

/// RMS energy threshold over normalized samples
#[derive(Debug, Clone, Copy)]
pub struct EnergyGate {
    threshold: f32,
}

impl EnergyGate {
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl VoiceActivityGate for EnergyGate {
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool> {
        Ok(rms_energy(frame) > self.threshold)
    }
}

/// Calculate RMS energy of i16 samples, normalized to 0.0-1.0
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let s = i16_to_f32(s);
            s * s
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}
