//! Voice session lifecycle
//!
//! A `SessionManager` owns at most one voice run at a time. The run executes on
//! a dedicated `heychef-voice` thread; callers start it, observe it through the
//! shared status board and stop it with the run's stop signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::VoiceBackend;
use crate::config::Config;
use crate::persona::PersonaPromptStore;
use crate::turn::{
    ConversationTurnController, PersonaSelection, RunOptions, RunSummary, StatusBoard, StopSignal,
    TurnResult, TurnState,
};
use crate::{Error, Result};

const WORKER_THREAD_NAME: &str = "heychef-voice";

/// Values used when a start request leaves an option out
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub persona: String,
    pub maintain_history: bool,
    pub streaming: bool,
    pub stream_start_threshold: usize,
}

impl From<&Config> for SessionDefaults {
    fn from(config: &Config) -> Self {
        Self {
            persona: config.session.persona.clone(),
            maintain_history: config.session.maintain_history,
            streaming: config.session.streaming,
            stream_start_threshold: config.llm.stream_start_threshold,
        }
    }
}

/// Request to start a voice run
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub recipe: String,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub maintain_history: Option<bool>,
    #[serde(default)]
    pub streaming: Option<bool>,
}

impl StartRequest {
    #[must_use]
    pub fn new(recipe: impl Into<String>) -> Self {
        Self {
            recipe: recipe.into(),
            ..Self::default()
        }
    }
}

/// Snapshot of the session for display
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: TurnState,
    pub running: bool,
    pub persona: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub latest: Option<TurnResult>,
    pub last_error: Option<String>,
}

struct ActiveRun {
    session_id: Uuid,
    stop: StopSignal,
    handle: JoinHandle<Result<RunSummary>>,
}

impl ActiveRun {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    fn join(self) -> Result<RunSummary> {
        self.handle
            .join()
            .map_err(|_| Error::Worker("voice worker panicked".to_string()))?
    }
}

/// Starts, stops and observes voice runs
pub struct SessionManager {
    backend: Arc<dyn VoiceBackend>,
    personas: Arc<PersonaPromptStore>,
    board: Arc<StatusBoard>,
    selection: PersonaSelection,
    defaults: SessionDefaults,
    active: Mutex<Option<ActiveRun>>,
    starting: AtomicBool,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        backend: Arc<dyn VoiceBackend>,
        personas: Arc<PersonaPromptStore>,
        defaults: SessionDefaults,
    ) -> Self {
        let selection = PersonaSelection::new(defaults.persona.clone());
        Self {
            backend,
            personas,
            board: Arc::new(StatusBoard::new()),
            selection,
            defaults,
            active: Mutex::new(None),
            starting: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn personas(&self) -> &Arc<PersonaPromptStore> {
        &self.personas
    }

    #[must_use]
    pub const fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    /// Start a run and block until its subsystems are set up
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if a run is active, `InvalidInput` or
    /// `PersonaNotFound` for a bad request, or the setup error of the run
    pub fn start(&self, request: StartRequest) -> Result<Uuid> {
        if self.starting.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }
        let result = self.start_exclusive(request);
        self.starting.store(false, Ordering::SeqCst);
        result
    }

    fn start_exclusive(&self, request: StartRequest) -> Result<Uuid> {
        {
            let mut active = self.lock_active();
            if active.as_ref().is_some_and(ActiveRun::is_running) {
                return Err(Error::AlreadyRunning);
            }
            if let Some(finished) = active.take()
                && let Err(e) = finished.join()
            {
                tracing::debug!(error = %e, "previous voice run had failed");
            }
        }

        let options = self.run_options(request)?;
        self.board.clear_error();

        let stop = StopSignal::new();
        let controller =
            ConversationTurnController::new(Arc::clone(&self.backend), Arc::clone(&self.personas))
                .with_board(Arc::clone(&self.board))
                .with_persona_selection(self.selection.clone())
                .with_stop_signal(stop.clone());
        let session_id = controller.session_id();

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                controller.run_reporting(&options, |ready| {
                    let _ = ready_tx.send(ready.is_ok());
                })
            })
            .map_err(|e| Error::Worker(format!("failed to spawn voice worker: {e}")))?;

        let run = ActiveRun {
            session_id,
            stop,
            handle,
        };

        if ready_rx.recv().unwrap_or(false) {
            tracing::info!(%session_id, "voice session started");
            *self.lock_active() = Some(run);
            return Ok(session_id);
        }

        match run.join() {
            Err(e) => Err(e),
            Ok(_) => Err(Error::Worker(
                "voice worker exited before setup finished".to_string(),
            )),
        }
    }

    fn run_options(&self, request: StartRequest) -> Result<RunOptions> {
        if request.recipe.trim().is_empty() {
            return Err(Error::InvalidInput("recipe must not be empty".to_string()));
        }

        let persona = request
            .persona
            .unwrap_or_else(|| self.selection.get());
        self.personas.get(&persona)?;

        Ok(RunOptions {
            recipe: request.recipe,
            persona,
            maintain_history: request
                .maintain_history
                .unwrap_or(self.defaults.maintain_history),
            streaming: request.streaming.unwrap_or(self.defaults.streaming),
            stream_start_threshold: self.defaults.stream_start_threshold,
        })
    }

    /// Request the active run to stop without waiting for it
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` if no run is active
    pub fn stop(&self) -> Result<()> {
        let active = self.lock_active();
        match active.as_ref() {
            Some(run) if run.is_running() => {
                run.stop.stop();
                tracing::info!(session_id = %run.session_id, "voice session stop requested");
                Ok(())
            }
            _ => Err(Error::NotRunning),
        }
    }

    /// Wait for the current run to end
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` if there is no run, or the error the run ended with
    pub fn wait(&self) -> Result<RunSummary> {
        let run = self.lock_active().take().ok_or(Error::NotRunning)?;
        run.join()
    }

    /// Stop the current run and wait for it to release its subsystems
    ///
    /// # Errors
    ///
    /// Same as [`Self::wait`]
    pub fn stop_and_wait(&self) -> Result<RunSummary> {
        let run = self.lock_active().take().ok_or(Error::NotRunning)?;
        run.stop.stop();
        run.join()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_active().as_ref().is_some_and(ActiveRun::is_running)
    }

    /// Change the persona used from the next turn on
    ///
    /// # Errors
    ///
    /// Returns `PersonaNotFound` for an unknown id
    pub fn select_persona(&self, id: &str) -> Result<()> {
        self.personas.get(id)?;
        self.selection.set(id);
        tracing::info!(persona = %id, "persona selected");
        Ok(())
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let (running, session_id) = {
            let active = self.lock_active();
            match active.as_ref() {
                Some(run) if run.is_running() => (true, Some(run.session_id)),
                _ => (false, None),
            }
        };

        SessionStatus {
            state: self.board.state(),
            running,
            persona: self.selection.get(),
            session_id,
            latest: self.board.latest().map(|result| (*result).clone()),
            last_error: self.board.last_error(),
        }
    }

    /// Empty the published answer slot
    pub fn clear_answer(&self) {
        self.board.clear_latest();
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(run) = self.lock_active().take() {
            run.stop.stop();
            if let Err(e) = run.join() {
                tracing::debug!(error = %e, "voice run ended with error during shutdown");
            }
        }
    }
}
