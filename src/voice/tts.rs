//! Text-to-speech (TTS) rendering
//!
//! A `SpeechRenderer` turns one chunk of text into audio and plays it before
//! returning. Both renderers cut playback short once the stop signal is set.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use super::playback::AudioPlayback;
use crate::config::{Config, SpeechConfig, TtsProvider};
use crate::turn::StopSignal;
use crate::{Error, Result};

/// Poll interval for external playback processes
const CHILD_POLL: Duration = Duration::from_millis(50);

/// Renders and plays speech, one chunk at a time
pub trait SpeechRenderer {
    /// Synthesize `text` and play it, blocking until playback ends
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    fn render_and_play(&self, text: &str) -> Result<()>;

    /// Terminate any in-flight playback
    fn halt(&self) {}

    /// Short acknowledgement after the wake word; fire-and-forget
    fn acknowledge(&self) {}
}

/// Build the renderer selected in configuration
///
/// # Errors
///
/// Returns error if the provider's key or tools are missing
pub fn from_config(config: &Config, stop: &StopSignal) -> Result<Box<dyn SpeechRenderer>> {
    let chime = config.audio.chime;
    let renderer: Box<dyn SpeechRenderer> = match config.speech.tts_provider {
        TtsProvider::System => {
            Box::new(SystemVoice::new(&config.speech, stop.clone())?.with_chime(chime))
        }
        TtsProvider::OpenAi => Box::new(
            RemoteVoice::new_openai(
                config.api_keys.openai.clone().unwrap_or_default(),
                &config.speech,
                stop.clone(),
            )?
            .with_chime(chime),
        ),
        TtsProvider::ElevenLabs => Box::new(
            RemoteVoice::new_elevenlabs(
                config.api_keys.elevenlabs.clone().unwrap_or_default(),
                &config.speech,
                stop.clone(),
            )?
            .with_chime(chime),
        ),
    };
    Ok(renderer)
}

/// Hosted TTS provider
#[derive(Clone, Copy, Debug)]
enum RemoteProvider {
    OpenAi,
    ElevenLabs,
}

/// Synthesizes through a hosted TTS API and plays the MP3 locally
pub struct RemoteVoice {
    client: reqwest::blocking::Client,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
    provider: RemoteProvider,
    playback: AudioPlayback,
    chime: bool,
}

impl RemoteVoice {
    /// Create a renderer using `OpenAI` TTS
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or no output device exists
    pub fn new_openai(api_key: String, speech: &SpeechConfig, stop: StopSignal) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::blocking::Client::new(),
            api_key,
            voice: speech.tts_voice.clone(),
            speed: speech.tts_speed,
            model: speech.tts_model.clone(),
            provider: RemoteProvider::OpenAi,
            playback: AudioPlayback::new(stop)?,
            chime: true,
        })
    }

    /// Create a renderer using ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or no output device exists
    pub fn new_elevenlabs(
        api_key: String,
        speech: &SpeechConfig,
        stop: StopSignal,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        // OpenAI model names mean nothing to ElevenLabs
        let model = if speech.tts_model.starts_with("tts-") {
            "eleven_monolingual_v1".to_string()
        } else {
            speech.tts_model.clone()
        };

        Ok(Self {
            client: reqwest::blocking::Client::new(),
            api_key,
            voice: speech.tts_voice.clone(),
            speed: 1.0, // ElevenLabs doesn't use speed in the same way
            model,
            provider: RemoteProvider::ElevenLabs,
            playback: AudioPlayback::new(stop)?,
            chime: true,
        })
    }

    /// Enable or disable the acknowledgement chime
    #[must_use]
    pub const fn with_chime(mut self, chime: bool) -> Self {
        self.chime = chime;
        self
    }

    /// Synthesize text to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        match self.provider {
            RemoteProvider::OpenAi => self.synthesize_openai(text),
            RemoteProvider::ElevenLabs => self.synthesize_elevenlabs(text),
        }
    }

    /// Synthesize using OpenAI TTS
    fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes()?.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{}", self.voice);

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        Ok(response.bytes()?.to_vec())
    }
}

impl SpeechRenderer for RemoteVoice {
    fn render_and_play(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }

        let audio = self.synthesize(text)?;
        tracing::debug!(chars = text.len(), bytes = audio.len(), "speech synthesized");
        self.playback.play_mp3(&audio)
    }

    fn acknowledge(&self) {
        if !self.chime {
            return;
        }
        let playback = self.playback.clone();
        std::thread::spawn(move || {
            if let Err(e) = playback.play_chime() {
                tracing::debug!(error = %e, "chime failed");
            }
        });
    }
}

/// macOS system voice: `say` renders to AIFF, `afplay` plays it
pub struct SystemVoice {
    voice: String,
    rate: u32,
    stop: StopSignal,
    chime: bool,
}

impl SystemVoice {
    /// # Errors
    ///
    /// Returns error if `say` or `afplay` is not installed
    pub fn new(speech: &SpeechConfig, stop: StopSignal) -> Result<Self> {
        for tool in ["say", "afplay"] {
            which::which(tool).map_err(|_| {
                Error::Tts(format!("`{tool}` not found; the system voice needs macOS"))
            })?;
        }

        Ok(Self {
            voice: speech.system_voice.clone(),
            rate: speech.system_rate,
            stop,
            chime: true,
        })
    }

    /// Enable or disable the acknowledgement chime
    #[must_use]
    pub const fn with_chime(mut self, chime: bool) -> Self {
        self.chime = chime;
        self
    }

    fn say_command(&self) -> Command {
        let mut cmd = Command::new("say");
        cmd.arg("-v")
            .arg(&self.voice)
            .arg("-r")
            .arg(self.rate.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    fn render_to_file(&self, text: &str, path: &Path) -> Result<()> {
        let mut cmd = self.say_command();
        cmd.arg("-o").arg(path).arg(text);
        self.run_to_completion(cmd.spawn()?, "say")
    }

    fn speak_direct(&self, text: &str) -> Result<()> {
        let mut cmd = self.say_command();
        cmd.arg(text);
        self.run_to_completion(cmd.spawn()?, "say")
    }

    /// Wait for a child process, killing it if the stop signal is set
    fn run_to_completion(&self, mut child: Child, name: &str) -> Result<()> {
        loop {
            if let Some(status) = child.try_wait()? {
                if status.success() {
                    return Ok(());
                }
                return Err(Error::Tts(format!("`{name}` exited with {status}")));
            }

            if self.stop.is_stopped() {
                tracing::debug!(process = name, "killing playback process");
                let _ = child.kill();
                let _ = child.wait();
                return Ok(());
            }

            std::thread::sleep(CHILD_POLL);
        }
    }
}

impl SpeechRenderer for SystemVoice {
    fn render_and_play(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }

        let file = tempfile::Builder::new()
            .prefix("heychef-")
            .suffix(".aiff")
            .tempfile()?;

        let played = self.render_to_file(text, file.path()).and_then(|()| {
            let child = Command::new("afplay")
                .arg(file.path())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()?;
            self.run_to_completion(child, "afplay")
        });

        if let Err(e) = played {
            tracing::warn!(error = %e, "system voice failed, speaking directly");
            return self.speak_direct(text);
        }
        Ok(())
    }

    fn acknowledge(&self) {
        if !self.chime {
            return;
        }
        std::thread::spawn(|| {
            let result = Command::new("afplay")
                .arg("/System/Library/Sounds/Tink.aiff")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = result {
                tracing::debug!(error = %e, "chime failed");
            }
        });
    }
}
