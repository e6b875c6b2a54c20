//! State shared between the voice worker and its observers
//!
//! The worker is the only writer. Observers (the HTTP surface, the CLI) read
//! the turn state, the latest published answer and request a stop.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where the controller is within one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TurnState {
    Idle = 0,
    AwaitingWakeWord = 1,
    Recording = 2,
    Transcribing = 3,
    Generating = 4,
    Speaking = 5,
}

impl TurnState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::AwaitingWakeWord,
            2 => Self::Recording,
            3 => Self::Transcribing,
            4 => Self::Generating,
            5 => Self::Speaking,
            _ => Self::Idle,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingWakeWord => "awaiting_wake_word",
            Self::Recording => "recording",
            Self::Transcribing => "transcribing",
            Self::Generating => "generating",
            Self::Speaking => "speaking",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation flag, one per run
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for up to `duration`, waking early once stopped
    ///
    /// Returns true if the signal is set.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(20);

        let deadline = std::time::Instant::now() + duration;
        while !self.is_stopped() {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }
        true
    }
}

/// One completed turn, as published for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    /// 1-based turn number within the run
    pub turn: u64,
    pub question: String,
    pub answer: String,
    pub persona_id: String,
    pub completed_at: DateTime<Utc>,
}

/// Single-slot published state: turn state plus latest answer
///
/// Readers see either the previous complete result or the new one.
#[derive(Debug, Default)]
pub struct StatusBoard {
    state: AtomicU8,
    latest: RwLock<Option<Arc<TurnResult>>>,
    last_error: RwLock<Option<String>>,
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> TurnState {
        TurnState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: TurnState) {
        let previous = self.state.swap(state as u8, Ordering::SeqCst);
        if previous != state as u8 {
            tracing::debug!(state = %state, "turn state changed");
        }
    }

    /// Overwrite the latest result
    pub fn publish(&self, result: TurnResult) {
        let mut slot = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(result));
    }

    #[must_use]
    pub fn latest(&self) -> Option<Arc<TurnResult>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_latest(&self) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Remember the most recent failure for display
    pub fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_error(&self) {
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Persona used from the next turn on
///
/// Written by observers, read by the worker at the start of each generation.
#[derive(Debug, Clone)]
pub struct PersonaSelection(Arc<RwLock<String>>);

impl PersonaSelection {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(id.into())))
    }

    #[must_use]
    pub fn get(&self) -> String {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, id: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = id.into();
    }
}
