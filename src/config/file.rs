//! TOML configuration file loading
//!
//! Supports `~/.config/heychef/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct HeyChefConfigFile {
    /// Audio capture and voice activity settings
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Wake word settings
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Language model settings
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech-to-text and text-to-speech settings
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Defaults for a voice session
    #[serde(default)]
    pub session: SessionFileConfig,

    /// HTTP control surface
    #[serde(default)]
    pub server: ServerFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub frame_duration_ms: Option<u32>,
    pub max_silence_secs: Option<f32>,
    /// "webrtc" or "energy"
    pub vad: Option<String>,
    pub vad_aggressiveness: Option<u8>,
    pub energy_threshold: Option<f32>,
    pub chime: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// "transcript" or "rustpotter"
    pub engine: Option<String>,
    pub phrases: Option<Vec<String>>,
    pub model_path: Option<String>,
    pub threshold: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gpt-4o")
    pub model: Option<String>,

    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,

    /// Characters buffered before streamed speech starts
    pub stream_start_threshold: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// "whisper" or "deepgram"
    pub stt_provider: Option<String>,
    pub stt_model: Option<String>,
    /// "system", "openai" or "elevenlabs"
    pub tts_provider: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f32>,
    pub system_voice: Option<String>,
    pub system_rate: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub persona: Option<String>,
    pub maintain_history: Option<bool>,
    pub streaming: Option<bool>,
    pub recipe_path: Option<String>,
    pub recipe_page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
    pub notion: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `HeyChefConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> HeyChefConfigFile {
    config_file_path().map_or_else(HeyChefConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path, falling back to defaults
pub fn load_from(path: &Path) -> HeyChefConfigFile {
    if !path.exists() {
        return HeyChefConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                HeyChefConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            HeyChefConfigFile::default()
        }
    }
}

/// Return the config directory: `~/.config/heychef`
pub fn config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("heychef"))
}

/// Return the config file path: `~/.config/heychef/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}
