//! Hey Chef - hands-free cooking assistant
//!
//! This library provides the voice loop behind Hey Chef:
//! - Wake word detection, voice-activity-gated recording and transcription
//! - Recipe-aware answers from a chat-completion model, optionally streamed
//! - Spoken replies with sentence-level flushing while the answer is generated
//! - Session control over a small HTTP API
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              CLI  │  HTTP control surface            │
//! └────────────────────┬────────────────────────────────┘
//!                      │ SessionManager
//! ┌────────────────────▼────────────────────────────────┐
//! │        ConversationTurnController (worker)          │
//! │  wake → record → transcribe → generate → speak      │
//! └────────────────────┬────────────────────────────────┘
//!                      │ VoiceBackend
//! ┌────────────────────▼────────────────────────────────┐
//! │  Microphone │ VAD │ STT │ Chat LLM │ TTS │ Speaker  │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod persona;
pub mod recipe;
pub mod session;
pub mod turn;
pub mod voice;

pub use backend::{LiveBackend, VoiceBackend};
pub use config::Config;
pub use error::{Error, Result};
pub use persona::{PersonaConfig, PersonaPromptStore};
pub use recipe::{FileRecipe, InlineRecipe, NotionRecipe, RecipeSource};
pub use session::{SessionManager, SessionStatus, StartRequest};
pub use turn::{ConversationTurnController, RunOptions, RunSummary, StopSignal, TurnResult, TurnState};
