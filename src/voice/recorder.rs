//! Utterance capture bounded by trailing silence

use super::capture::{AudioInput, FrameSource};
use super::clip::AudioClip;
use super::vad::VoiceActivityGate;
use crate::Result;
use crate::config::AudioConfig;
use crate::turn::StopSignal;

/// Produces one spoken utterance per call
pub trait UtteranceSource {
    /// Record until the speaker falls silent
    ///
    /// Returns `Ok(None)` when no speech was captured.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened
    fn record_until_silence(&mut self) -> Result<Option<AudioClip>>;

    /// Release held resources; safe to call more than once
    fn cleanup(&mut self) {}
}

/// Frame count after which a silence run ends the recording
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn silence_frame_limit(max_silence_secs: f32, frame_duration_ms: u32) -> usize {
    if frame_duration_ms == 0 {
        return 0;
    }
    ((max_silence_secs * 1000.0) / frame_duration_ms as f32).max(0.0) as usize
}

/// Samples per frame for a rate and frame duration
#[must_use]
pub fn frame_length(sample_rate: u32, frame_duration_ms: u32) -> usize {
    (sample_rate as usize * frame_duration_ms as usize) / 1000
}

/// Captures one utterance using a voice activity gate
///
/// Frames before the first speech frame are discarded. After that every frame
/// is kept until the run of consecutive silent frames exceeds the limit.
pub struct SpeechRecorder {
    input: Box<dyn AudioInput>,
    gate: Box<dyn VoiceActivityGate>,
    sample_rate: u32,
    frame_len: usize,
    silence_limit: usize,
    stop: StopSignal,
}

impl SpeechRecorder {
    #[must_use]
    pub fn new(
        input: Box<dyn AudioInput>,
        gate: Box<dyn VoiceActivityGate>,
        audio: &AudioConfig,
        stop: StopSignal,
    ) -> Self {
        let frame_len = frame_length(audio.sample_rate, audio.frame_duration_ms);
        let silence_limit = silence_frame_limit(audio.max_silence_secs, audio.frame_duration_ms);

        tracing::debug!(frame_len, silence_limit, "speech recorder initialized");

        Self {
            input,
            gate,
            sample_rate: audio.sample_rate,
            frame_len,
            silence_limit,
            stop,
        }
    }

    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.frame_len
    }

    #[must_use]
    pub const fn silence_limit(&self) -> usize {
        self.silence_limit
    }

    /// Run the capture loop over an already-open frame source
    ///
    /// Read or classification errors end the recording: before speech they
    /// yield `None`, after speech the frames buffered so far are kept.
    pub fn capture_from(&mut self, source: &mut dyn FrameSource) -> Option<AudioClip> {
        let mut triggered = false;
        let mut silence_run = 0usize;
        let mut buffered: Vec<i16> = Vec::new();

        loop {
            if self.stop.is_stopped() {
                tracing::debug!("recording cancelled");
                return None;
            }

            let frame = match source.read_frame(self.frame_len) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, triggered, "microphone read failed");
                    break;
                }
            };

            let is_speech = match self.gate.is_speech(&frame) {
                Ok(is_speech) => is_speech,
                Err(e) => {
                    tracing::warn!(error = %e, triggered, "voice activity check failed");
                    break;
                }
            };

            if !triggered {
                if is_speech {
                    tracing::trace!("speech started");
                    triggered = true;
                    buffered.extend_from_slice(&frame);
                }
                continue;
            }

            buffered.extend_from_slice(&frame);
            if is_speech {
                silence_run = 0;
            } else {
                silence_run += 1;
                if silence_run > self.silence_limit {
                    tracing::trace!(silence_run, "silence limit exceeded");
                    break;
                }
            }
        }

        if !triggered || buffered.is_empty() {
            tracing::debug!("no speech captured");
            return None;
        }

        let clip = AudioClip::new(buffered, self.sample_rate);
        tracing::debug!(
            samples = clip.len(),
            secs = clip.duration_secs(),
            "utterance captured"
        );
        Some(clip)
    }
}

impl UtteranceSource for SpeechRecorder {
    fn record_until_silence(&mut self) -> Result<Option<AudioClip>> {
        let mut source = self.input.open(self.sample_rate)?;
        let clip = self.capture_from(source.as_mut());
        // Stream dropped here, releasing the microphone before transcription
        drop(source);
        Ok(clip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_limit_from_seconds() {
        assert_eq!(silence_frame_limit(1.0, 30), 33);
        assert_eq!(silence_frame_limit(0.5, 30), 16);
        assert_eq!(silence_frame_limit(0.09, 30), 3);
    }

    #[test]
    fn frame_length_for_rates() {
        assert_eq!(frame_length(16_000, 30), 480);
        assert_eq!(frame_length(8_000, 10), 80);
    }
}
