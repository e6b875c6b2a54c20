//! Error types for Hey Chef

use thiserror::Error;

/// Result type alias for Hey Chef operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Hey Chef
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Persona not found
    #[error("persona not found: {0}")]
    PersonaNotFound(String),

    /// Caller supplied an unusable argument
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Voice activity detection error
    #[error("vad error: {0}")]
    Vad(String),

    /// Wake word detection error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Language model error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Recipe could not be loaded
    #[error("recipe error: {0}")]
    Recipe(String),

    /// Subsystem setup failed before the voice loop started
    #[error("setup failed: {0}")]
    Setup(String),

    /// The voice worker thread could not be spawned or panicked
    #[error("voice worker failed: {0}")]
    Worker(String),

    /// A voice session is already running
    #[error("a voice session is already running")]
    AlreadyRunning,

    /// No voice session is running
    #[error("no voice session is running")]
    NotRunning,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML parsing error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
