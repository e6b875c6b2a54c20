//! Conversational turn-taking
//!
//! The controller owns the loop; the state types are what crosses the thread
//! boundary to observers.

mod controller;
mod state;

pub use controller::{ConversationTurnController, RunOptions, RunSummary};
pub use state::{PersonaSelection, StatusBoard, StopSignal, TurnResult, TurnState};
