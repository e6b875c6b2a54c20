//! Subsystem construction
//!
//! The controller asks a `VoiceBackend` for each subsystem at the start of a
//! run, on the worker thread. `LiveBackend` builds the real microphone, speech
//! and language-model clients from configuration.

use std::sync::Arc;

use crate::config::{Config, WakeEngineKind};
use crate::llm::{OpenAiChat, ResponseGenerator};
use crate::turn::StopSignal;
use crate::voice::{
    Microphone, RemoteTranscriber, SpeechRecorder, SpeechRenderer, Transcriber,
    TranscriptWakeEngine, UtteranceSource, WakeEngine, WakeSource, WakeWordListener, tts, vad,
};
use crate::Result;

/// Factory for the subsystems of one run
pub trait VoiceBackend: Send + Sync {
    /// # Errors
    ///
    /// Returns error if the microphone or wake engine cannot be initialized
    fn wake_listener(&self, stop: &StopSignal) -> Result<Box<dyn WakeSource>>;

    /// # Errors
    ///
    /// Returns error if the microphone or voice activity detector cannot be initialized
    fn recorder(&self, stop: &StopSignal) -> Result<Box<dyn UtteranceSource>>;

    /// # Errors
    ///
    /// Returns error if the STT provider is not configured
    fn transcriber(&self) -> Result<Box<dyn Transcriber>>;

    /// # Errors
    ///
    /// Returns error if the language model is not configured
    fn generator(&self) -> Result<Box<dyn ResponseGenerator>>;

    /// # Errors
    ///
    /// Returns error if the TTS provider is not configured or has no output
    fn renderer(&self, stop: &StopSignal) -> Result<Box<dyn SpeechRenderer>>;
}

/// Builds real subsystems from configuration
#[derive(Debug, Clone)]
pub struct LiveBackend {
    config: Arc<Config>,
}

impl LiveBackend {
    #[must_use]
    pub const fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn wake_engine(&self) -> Result<Box<dyn WakeEngine>> {
        let config = &self.config;
        match config.wake.engine {
            WakeEngineKind::Transcript => {
                let transcriber = RemoteTranscriber::from_config(config)?;
                Ok(Box::new(TranscriptWakeEngine::new(
                    Box::new(transcriber),
                    config.wake.phrases.clone(),
                    config.audio.sample_rate,
                )?))
            }
            #[cfg(feature = "rustpotter")]
            WakeEngineKind::Rustpotter => Ok(Box::new(crate::voice::KeywordEngine::new(
                &config.wake.model_path,
                config.audio.sample_rate,
                config.wake.threshold,
            )?)),
            #[cfg(not(feature = "rustpotter"))]
            WakeEngineKind::Rustpotter => Err(crate::Error::Config(
                "rustpotter wake engine requires the `rustpotter` feature".to_string(),
            )),
        }
    }
}

impl VoiceBackend for LiveBackend {
    fn wake_listener(&self, stop: &StopSignal) -> Result<Box<dyn WakeSource>> {
        let engine = self.wake_engine()?;
        Ok(Box::new(WakeWordListener::new(
            Box::new(Microphone::new()?),
            engine,
            stop.clone(),
        )))
    }

    fn recorder(&self, stop: &StopSignal) -> Result<Box<dyn UtteranceSource>> {
        let gate = vad::from_config(&self.config.audio)?;
        Ok(Box::new(SpeechRecorder::new(
            Box::new(Microphone::new()?),
            gate,
            &self.config.audio,
            stop.clone(),
        )))
    }

    fn transcriber(&self) -> Result<Box<dyn Transcriber>> {
        Ok(Box::new(RemoteTranscriber::from_config(&self.config)?))
    }

    fn generator(&self) -> Result<Box<dyn ResponseGenerator>> {
        Ok(Box::new(OpenAiChat::from_config(&self.config)?))
    }

    fn renderer(&self, stop: &StopSignal) -> Result<Box<dyn SpeechRenderer>> {
        tts::from_config(&self.config, stop)
    }
}
