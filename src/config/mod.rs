//! Configuration management for Hey Chef
//!
//! Values are layered: environment > `config.toml` > defaults.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;

use crate::{Error, Result};

use file::HeyChefConfigFile;

/// Default wake phrase for the transcript-verified wake engine
pub const DEFAULT_WAKE_PHRASE: &str = "hey chef";

/// Hey Chef configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Audio capture and voice activity settings
    pub audio: AudioConfig,

    /// Wake word settings
    pub wake: WakeConfig,

    /// Language model settings
    pub llm: LlmConfig,

    /// STT/TTS settings
    pub speech: SpeechConfig,

    /// Defaults for a voice session
    pub session: SessionConfig,

    /// HTTP control surface
    pub server: ServerConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Directory scanned for additional persona files
    pub persona_dir: PathBuf,
}

/// Voice activity detector backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadKind {
    /// WebRTC VAD (aggressiveness 0-3)
    WebRtc,
    /// RMS energy threshold
    Energy,
}

impl FromStr for VadKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "webrtc" => Ok(Self::WebRtc),
            "energy" => Ok(Self::Energy),
            other => Err(Error::Config(format!("unknown vad kind: {other}"))),
        }
    }
}

/// Audio capture settings
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Microphone sample rate in Hz
    pub sample_rate: u32,

    /// Duration of one VAD frame in milliseconds (10, 20 or 30)
    pub frame_duration_ms: u32,

    /// Trailing silence that ends a recording
    pub max_silence_secs: f32,

    /// VAD backend
    pub vad: VadKind,

    /// WebRTC VAD aggressiveness (0-3)
    pub vad_aggressiveness: u8,

    /// RMS threshold for the energy VAD (normalized samples)
    pub energy_threshold: f32,

    /// Play a short tone after the wake word fires
    pub chime: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_duration_ms: 30,
            max_silence_secs: 1.0,
            vad: VadKind::WebRtc,
            vad_aggressiveness: 1,
            energy_threshold: 0.03,
            chime: true,
        }
    }
}

/// Wake word engine backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeEngineKind {
    /// Energy-gated speech segment verified by transcription
    Transcript,
    /// Rustpotter keyword model
    Rustpotter,
}

impl FromStr for WakeEngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "transcript" => Ok(Self::Transcript),
            "rustpotter" => Ok(Self::Rustpotter),
            other => Err(Error::Config(format!("unknown wake engine: {other}"))),
        }
    }
}

/// Wake word settings
#[derive(Debug, Clone)]
pub struct WakeConfig {
    pub engine: WakeEngineKind,

    /// Phrases matched by the transcript engine (index = keyword index)
    pub phrases: Vec<String>,

    /// Rustpotter `.rpw` keyword model
    pub model_path: PathBuf,

    /// Minimum detection score (0.0-1.0)
    pub threshold: f32,
}

impl Default for WakeConfig {
    fn default() -> Self {
        let model_path = file::config_dir().map_or_else(
            || PathBuf::from("models/hey_chef.rpw"),
            |d| d.join("models").join("hey_chef.rpw"),
        );

        Self {
            engine: WakeEngineKind::Transcript,
            phrases: vec![DEFAULT_WAKE_PHRASE.to_string()],
            model_path,
            threshold: 0.5,
        }
    }
}

/// Language model settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,

    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// Characters buffered before streamed speech starts
    pub stream_start_threshold: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            stream_start_threshold: 80,
        }
    }
}

/// Speech-to-text provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Text-to-speech provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    /// macOS `say` + `afplay`
    System,
    OpenAi,
    ElevenLabs,
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "system" | "say" => Ok(Self::System),
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// STT/TTS settings
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    pub tts_provider: TtsProvider,

    /// Remote TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// Remote TTS voice identifier
    pub tts_voice: String,

    /// Remote TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// System voice name for `say -v`
    pub system_voice: String,

    /// System voice rate in words per minute
    pub system_rate: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            stt_provider: SttProvider::Whisper,
            stt_model: "whisper-1".to_string(),
            tts_provider: TtsProvider::System,
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.25,
            system_voice: "Samantha".to_string(),
            system_rate: 219,
        }
    }
}

/// Defaults for a voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub persona: String,
    pub maintain_history: bool,
    pub streaming: bool,
    pub recipe_path: Option<PathBuf>,

    /// Notion page to read the recipe from when no file is given
    pub recipe_page: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persona: crate::persona::DEFAULT_PERSONA.to_string(),
            maintain_history: true,
            streaming: false,
            recipe_path: None,
            recipe_page: None,
        }
    }
}

/// HTTP control surface configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8787 }
    }
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, chat, TTS)
    pub openai: Option<String>,

    /// ElevenLabs API key
    pub elevenlabs: Option<String>,

    /// Deepgram API key
    pub deepgram: Option<String>,

    /// Notion integration token (recipe pages)
    pub notion: Option<String>,

}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |k: &Option<String>| k.as_ref().map(|_| "<redacted>");
        f.debug_struct("ApiKeys")
            .field("openai", &mask(&self.openai))
            .field("elevenlabs", &mask(&self.elevenlabs))
            .field("deepgram", &mask(&self.deepgram))
            .field("notion", &mask(&self.notion))
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            wake: WakeConfig::default(),
            llm: LlmConfig::default(),
            speech: SpeechConfig::default(),
            session: SessionConfig::default(),
            server: ServerConfig::default(),
            api_keys: ApiKeys::default(),
            persona_dir: default_persona_dir(),
        }
    }
}

/// Default directory for user personas: `~/.config/heychef/personas`
fn default_persona_dir() -> PathBuf {
    file::config_dir().map_or_else(|| PathBuf::from("personas"), |d| d.join("personas"))
}

/// Treat empty environment values as unset
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse an optional string setting into its typed form
fn parse_opt<T: FromStr<Err = Error>>(value: Option<String>) -> Result<Option<T>> {
    value.map(|v| v.parse()).transpose()
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load(persona_override: Option<&str>) -> Result<Self> {
        let fc = file::load_config_file();
        let mut config = Self::resolve(fc, |key| std::env::var(key).ok())?;

        if let Some(persona) = persona_override.filter(|p| !p.is_empty()) {
            config.session.persona = persona.to_string();
        }

        Ok(config)
    }

    /// Resolve a configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn resolve(fc: HeyChefConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = |key: &str| non_empty(env(key));
        let defaults = Self::default();

        let audio = AudioConfig {
            sample_rate: fc.audio.sample_rate.unwrap_or(defaults.audio.sample_rate),
            frame_duration_ms: fc
                .audio
                .frame_duration_ms
                .unwrap_or(defaults.audio.frame_duration_ms),
            max_silence_secs: env("HEYCHEF_MAX_SILENCE_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.audio.max_silence_secs)
                .unwrap_or(defaults.audio.max_silence_secs),
            vad: parse_opt(env("HEYCHEF_VAD").or(fc.audio.vad))?.unwrap_or(defaults.audio.vad),
            vad_aggressiveness: fc
                .audio
                .vad_aggressiveness
                .unwrap_or(defaults.audio.vad_aggressiveness),
            energy_threshold: fc
                .audio
                .energy_threshold
                .unwrap_or(defaults.audio.energy_threshold),
            chime: fc.audio.chime.unwrap_or(defaults.audio.chime),
        };

        let wake = WakeConfig {
            engine: parse_opt(env("HEYCHEF_WAKE_ENGINE").or(fc.wake.engine))?
                .unwrap_or(defaults.wake.engine),
            phrases: fc
                .wake
                .phrases
                .map(|p| {
                    p.into_iter()
                        .map(|w| w.trim().to_lowercase())
                        .filter(|w| !w.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.wake.phrases),
            model_path: env("HEYCHEF_WAKE_MODEL")
                .or(fc.wake.model_path)
                .map_or(defaults.wake.model_path, PathBuf::from),
            threshold: fc.wake.threshold.unwrap_or(defaults.wake.threshold),
        };

        let llm = LlmConfig {
            model: env("HEYCHEF_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or(defaults.llm.model),
            base_url: env("OPENAI_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or(defaults.llm.base_url),
            stream_start_threshold: fc
                .llm
                .stream_start_threshold
                .unwrap_or(defaults.llm.stream_start_threshold),
        };

        // USE_EXTERNAL_TTS switches the default system voice to OpenAI TTS
        let external_tts = env("USE_EXTERNAL_TTS").map(|_| "openai".to_string());
        let speech = SpeechConfig {
            stt_provider: parse_opt(env("HEYCHEF_STT_PROVIDER").or(fc.speech.stt_provider))?
                .unwrap_or(defaults.speech.stt_provider),
            stt_model: env("HEYCHEF_STT_MODEL")
                .or(fc.speech.stt_model)
                .unwrap_or(defaults.speech.stt_model),
            tts_provider: parse_opt(
                env("HEYCHEF_TTS_PROVIDER")
                    .or(external_tts)
                    .or(fc.speech.tts_provider),
            )?
            .unwrap_or(defaults.speech.tts_provider),
            tts_model: env("HEYCHEF_TTS_MODEL")
                .or(fc.speech.tts_model)
                .unwrap_or(defaults.speech.tts_model),
            tts_voice: fc.speech.tts_voice.unwrap_or(defaults.speech.tts_voice),
            tts_speed: fc.speech.tts_speed.unwrap_or(defaults.speech.tts_speed),
            system_voice: fc.speech.system_voice.unwrap_or(defaults.speech.system_voice),
            system_rate: fc.speech.system_rate.unwrap_or(defaults.speech.system_rate),
        };

        let session = SessionConfig {
            persona: env("HEYCHEF_PERSONA")
                .or(fc.session.persona)
                .unwrap_or(defaults.session.persona),
            maintain_history: fc
                .session
                .maintain_history
                .unwrap_or(defaults.session.maintain_history),
            streaming: fc.session.streaming.unwrap_or(defaults.session.streaming),
            recipe_path: env("HEYCHEF_RECIPE")
                .or(fc.session.recipe_path)
                .map(PathBuf::from),
            recipe_page: env("HEYCHEF_RECIPE_PAGE").or(fc.session.recipe_page),
        };

        let server = ServerConfig {
            port: env("HEYCHEF_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(defaults.server.port),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            notion: env("NOTION_API_TOKEN").or(fc.api_keys.notion),
        };

        let config = Self {
            audio,
            wake,
            llm,
            speech,
            session,
            server,
            api_keys,
            persona_dir: env("HEYCHEF_PERSONA_DIR").map_or(defaults.persona_dir, PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check numeric tunables against what the audio stack accepts
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if ![8_000, 16_000, 32_000, 48_000].contains(&self.audio.sample_rate) {
            return Err(Error::Config(format!(
                "unsupported sample rate {} (expected 8000, 16000, 32000 or 48000)",
                self.audio.sample_rate
            )));
        }

        if ![10, 20, 30].contains(&self.audio.frame_duration_ms) {
            return Err(Error::Config(format!(
                "unsupported frame duration {} ms (expected 10, 20 or 30)",
                self.audio.frame_duration_ms
            )));
        }

        if self.audio.max_silence_secs <= 0.0 {
            return Err(Error::Config("max_silence_secs must be positive".to_string()));
        }

        if self.audio.vad_aggressiveness > 3 {
            return Err(Error::Config(format!(
                "vad_aggressiveness {} out of range 0-3",
                self.audio.vad_aggressiveness
            )));
        }

        if !(0.0..=1.0).contains(&self.wake.threshold) {
            return Err(Error::Config(format!(
                "wake threshold {} out of range 0.0-1.0",
                self.wake.threshold
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_resolve_cleanly() {
        let config = Config::resolve(HeyChefConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.audio.frame_duration_ms, 30);
        assert_eq!(config.wake.phrases, vec![DEFAULT_WAKE_PHRASE.to_string()]);
        assert_eq!(config.llm.stream_start_threshold, 80);
        assert_eq!(config.speech.tts_provider, TtsProvider::System);
        assert_eq!(config.session.persona, "normal");
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let fc: HeyChefConfigFile = toml::from_str(
            r#"
            [llm]
            model = "gpt-4o-mini"

            [session]
            persona = "normal"
            "#,
        )
        .unwrap();

        let config = Config::resolve(
            fc,
            env_from(&[("HEYCHEF_LLM_MODEL", "local-model"), ("HEYCHEF_PERSONA", "sassy")]),
        )
        .unwrap();

        assert_eq!(config.llm.model, "local-model");
        assert_eq!(config.session.persona, "sassy");
    }

    #[test]
    fn external_tts_flag_selects_openai() {
        let config = Config::resolve(
            HeyChefConfigFile::default(),
            env_from(&[("USE_EXTERNAL_TTS", "1")]),
        )
        .unwrap();
        assert_eq!(config.speech.tts_provider, TtsProvider::OpenAi);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let config = Config::resolve(
            HeyChefConfigFile::default(),
            env_from(&[("OPENAI_API_KEY", "  ")]),
        )
        .unwrap();
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn invalid_frame_duration_rejected() {
        let fc: HeyChefConfigFile = toml::from_str("[audio]\nframe_duration_ms = 25").unwrap();
        let err = Config::resolve(fc, env_from(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = Config::resolve(
            HeyChefConfigFile::default(),
            env_from(&[("HEYCHEF_TTS_PROVIDER", "carrier-pigeon")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn wake_phrases_normalized() {
        let fc: HeyChefConfigFile =
            toml::from_str("[wake]\nphrases = [\"  Hey CHEF \", \"\", \"ok chef\"]").unwrap();
        let config = Config::resolve(fc, env_from(&[])).unwrap();
        assert_eq!(config.wake.phrases, vec!["hey chef", "ok chef"]);
    }

    #[test]
    fn api_keys_debug_is_redacted() {
        let keys = ApiKeys {
            openai: Some("sk-secret".to_string()),
            ..ApiKeys::default()
        };
        let rendered = format!("{keys:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
