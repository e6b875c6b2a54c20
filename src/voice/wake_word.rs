//! Wake word detection
//!
//! `WakeWordListener` feeds microphone frames to a `WakeEngine` until the
//! engine reports a keyword. The default engine is a hybrid: local energy
//! detection finds a speech segment, then transcription verifies the phrase.

use super::capture::{AudioInput, FrameSource};
use super::clip::AudioClip;
use super::stt::Transcriber;
use super::vad::rms_energy;
use crate::turn::StopSignal;
use crate::{Error, Result};

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to trigger (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration to consider end of utterance (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Frame length requested by the transcript engine (32 ms at 16kHz)
const TRANSCRIPT_FRAME_LENGTH: usize = 512;

/// Keyword spotter over fixed-size frames
pub trait WakeEngine {
    /// Sample rate the engine requires
    fn sample_rate(&self) -> u32;

    /// Samples per frame the engine requires
    fn frame_length(&self) -> usize;

    /// Classify one frame
    ///
    /// Returns the keyword index, or a negative value when nothing fired.
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails
    fn process(&mut self, frame: &[i16]) -> Result<i32>;
}

/// Blocks until the wake word is heard
pub trait WakeSource {
    /// Listen until the wake word fires or the stop signal is set
    ///
    /// Returns `Ok(false)` when stopped.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone or engine fails
    fn detect_once(&mut self) -> Result<bool>;

    /// Release the engine and any open stream; idempotent
    fn cleanup(&mut self);
}

/// Listens for the wake word on the microphone
pub struct WakeWordListener {
    input: Box<dyn AudioInput>,
    engine: Option<Box<dyn WakeEngine>>,
    stop: StopSignal,
}

impl WakeWordListener {
    #[must_use]
    pub fn new(input: Box<dyn AudioInput>, engine: Box<dyn WakeEngine>, stop: StopSignal) -> Self {
        tracing::debug!(
            sample_rate = engine.sample_rate(),
            frame_length = engine.frame_length(),
            "wake word listener initialized"
        );

        Self {
            input,
            engine: Some(engine),
            stop,
        }
    }

    fn listen(
        engine: &mut dyn WakeEngine,
        stream: &mut dyn FrameSource,
        stop: &StopSignal,
    ) -> Result<bool> {
        let frame_len = engine.frame_length();

        loop {
            if stop.is_stopped() {
                tracing::debug!("wake word listening cancelled");
                return Ok(false);
            }

            let Some(frame) = stream.read_frame(frame_len)? else {
                return Err(Error::WakeWord("microphone stream ended".to_string()));
            };

            let index = engine.process(&frame)?;
            if index >= 0 {
                tracing::info!(keyword = index, "wake word detected");
                return Ok(true);
            }
        }
    }
}

impl WakeSource for WakeWordListener {
    fn detect_once(&mut self) -> Result<bool> {
        let engine = self
            .engine
            .as_deref_mut()
            .ok_or_else(|| Error::WakeWord("listener already released".to_string()))?;

        // Stream lives only for this call so the recorder can take the device
        let mut stream = self.input.open(engine.sample_rate())?;
        Self::listen(engine, stream.as_mut(), &self.stop)
    }

    fn cleanup(&mut self) {
        if self.engine.take().is_some() {
            tracing::debug!("wake word engine released");
        }
    }
}

impl Drop for WakeWordListener {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Detector state of the transcript engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Detected potential speech, accumulating
    Listening,
}

/// Energy-gated speech segments verified by transcription
///
/// The keyword index is the position of the matched phrase.
pub struct TranscriptWakeEngine {
    transcriber: Box<dyn Transcriber>,
    phrases: Vec<String>,
    sample_rate: u32,
    state: DetectorState,
    speech_buffer: Vec<i16>,
    silence_counter: usize,
}

impl TranscriptWakeEngine {
    /// Create a new transcript-verified engine
    ///
    /// # Errors
    ///
    /// Returns error if no usable wake phrase is given
    pub fn new(
        transcriber: Box<dyn Transcriber>,
        phrases: Vec<String>,
        sample_rate: u32,
    ) -> Result<Self> {
        let normalized: Vec<String> = phrases
            .into_iter()
            .map(|w| w.to_lowercase().trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();

        if normalized.is_empty() {
            return Err(Error::Config("at least one wake phrase is required".to_string()));
        }

        tracing::debug!(wake_phrases = ?normalized, "transcript wake engine initialized");

        Ok(Self {
            transcriber,
            phrases: normalized,
            sample_rate,
            state: DetectorState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
        })
    }

    /// Feed samples; returns true once a speech segment is complete
    fn accumulate(&mut self, samples: &[i16]) -> bool {
        let energy = rms_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Listening;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected, listening");
                }
            }
            DetectorState::Listening => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > SILENCE_SAMPLES
                    && self.speech_buffer.len() > MIN_SPEECH_SAMPLES
                {
                    tracing::debug!(samples = self.speech_buffer.len(), "speech segment complete");
                    return true;
                }

                // Too much silence without enough speech
                if self.silence_counter > SILENCE_SAMPLES * 2 {
                    tracing::trace!("timeout - resetting");
                    self.reset();
                }
            }
        }

        false
    }

    /// Index of the first wake phrase contained in `transcript`
    #[must_use]
    pub fn match_phrase(&self, transcript: &str) -> Option<usize> {
        let normalized = transcript.to_lowercase();
        self.phrases
            .iter()
            .position(|phrase| normalized.contains(phrase.as_str()))
    }

    fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }

    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }
}

impl WakeEngine for TranscriptWakeEngine {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_length(&self) -> usize {
        TRANSCRIPT_FRAME_LENGTH
    }

    fn process(&mut self, frame: &[i16]) -> Result<i32> {
        if !self.accumulate(frame) {
            return Ok(-1);
        }

        let clip = AudioClip::new(std::mem::take(&mut self.speech_buffer), self.sample_rate);
        self.reset();

        // A failed verification is a missed trigger, not a listener failure
        let transcript = match self.transcriber.transcribe(clip) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "wake phrase verification failed");
                return Ok(-1);
            }
        };

        match self.match_phrase(&transcript) {
            Some(index) => {
                tracing::debug!(transcript = %transcript, index, "wake phrase matched");
                Ok(i32::try_from(index).unwrap_or(i32::MAX))
            }
            None => {
                tracing::trace!(transcript = %transcript, "no wake phrase in segment");
                Ok(-1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct FixedTranscriber {
        text: String,
        calls: Arc<Mutex<usize>>,
    }

    impl Transcriber for FixedTranscriber {
        fn transcribe(&self, _clip: AudioClip) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.text.clone())
        }
    }

    fn engine(text: &str) -> (TranscriptWakeEngine, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        let transcriber = FixedTranscriber {
            text: text.to_string(),
            calls: Arc::clone(&calls),
        };
        let engine = TranscriptWakeEngine::new(
            Box::new(transcriber),
            vec!["Hey Chef".to_string(), "ok chef".to_string()],
            16_000,
        )
        .unwrap();
        (engine, calls)
    }

    /// Feed 0.6 s of loud audio then 0.6 s of silence, returning the first index >= 0
    fn run_segment(engine: &mut TranscriptWakeEngine) -> i32 {
        let loud = vec![8_000i16; TRANSCRIPT_FRAME_LENGTH];
        let quiet = vec![0i16; TRANSCRIPT_FRAME_LENGTH];

        let frames = std::iter::repeat_n(&loud, 19).chain(std::iter::repeat_n(&quiet, 19));
        for frame in frames {
            let index = engine.process(frame).unwrap();
            if index >= 0 {
                return index;
            }
        }
        -1
    }

    #[test]
    fn phrase_matching_is_case_insensitive() {
        let (engine, _) = engine("");
        assert_eq!(engine.match_phrase("HEY CHEF, what now?"), Some(0));
        assert_eq!(engine.match_phrase("okay... ok chef"), Some(1));
        assert_eq!(engine.match_phrase("hello world"), None);
    }

    #[test]
    fn segment_with_phrase_triggers() {
        let (mut engine, calls) = engine("Hey chef!");
        assert_eq!(run_segment(&mut engine), 0);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(engine.state(), DetectorState::Idle);
    }

    #[test]
    fn segment_without_phrase_does_not_trigger() {
        let (mut engine, calls) = engine("pass the salt");
        assert_eq!(run_segment(&mut engine), -1);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn silence_never_transcribes() {
        let (mut engine, calls) = engine("hey chef");
        let quiet = vec![0i16; TRANSCRIPT_FRAME_LENGTH];
        for _ in 0..100 {
            assert_eq!(engine.process(&quiet).unwrap(), -1);
        }
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn empty_phrase_list_rejected() {
        let transcriber = FixedTranscriber {
            text: String::new(),
            calls: Arc::new(Mutex::new(0)),
        };
        let result = TranscriptWakeEngine::new(Box::new(transcriber), vec!["  ".into()], 16_000);
        assert!(result.is_err());
    }
}
