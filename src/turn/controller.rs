//! The turn-taking loop
//!
//! One run acquires every subsystem, then repeats
//! wake → record → transcribe → generate → speak → publish until the stop
//! signal is set. Failures inside a turn cost that turn only; failures while
//! acquiring subsystems or while listening for the wake word end the run.
//! Subsystems are released on every exit path.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::state::{PersonaSelection, StatusBoard, StopSignal, TurnResult, TurnState};
use crate::backend::VoiceBackend;
use crate::history::{ChatMessage, ConversationHistory, one_shot_messages};
use crate::llm::{GenerationParams, ResponseGenerator};
use crate::persona::{PersonaConfig, PersonaPromptStore};
use crate::voice::{SpeechSynthesizer, Spoken, Transcriber, UtteranceSource, WakeSource};
use crate::{Error, Result};

/// Parameters of one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Recipe text the answers are conditioned on
    pub recipe: String,

    /// Persona for the first turn
    pub persona: String,

    /// Keep a conversation across turns instead of one-shot prompts
    pub maintain_history: bool,

    /// Speak while the answer is still being generated
    pub streaming: bool,

    /// Characters buffered before streamed speech starts
    pub stream_start_threshold: usize,
}

/// Counters reported when a run ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Wake words that started a turn
    pub turns_started: u64,

    /// Turns that ended with a published answer
    pub turns_completed: u64,
}

/// How a single turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnOutcome {
    Answered,
    NoSpeech,
    EmptyTranscript,
    NotDelivered,
    Stopped,
}

/// Everything one run holds, released in reverse acquisition order
struct Subsystems {
    listener: Box<dyn WakeSource>,
    recorder: Box<dyn UtteranceSource>,
    transcriber: Box<dyn Transcriber>,
    generator: Box<dyn ResponseGenerator>,
    synthesizer: SpeechSynthesizer,
    released: bool,
}

impl Subsystems {
    fn acquire(backend: &dyn VoiceBackend, stop: &StopSignal) -> Result<Self> {
        let setup = |what: &str, e: Error| Error::Setup(format!("{what}: {e}"));

        let mut listener = backend
            .wake_listener(stop)
            .map_err(|e| setup("wake word listener", e))?;

        let mut recorder = backend
            .recorder(stop)
            .map_err(|e| setup("speech recorder", e))
            .inspect_err(|_| listener.cleanup())?;

        let rest = backend
            .transcriber()
            .map_err(|e| setup("transcriber", e))
            .and_then(|transcriber| {
                let generator = backend
                    .generator()
                    .map_err(|e| setup("response generator", e))?;
                let renderer = backend
                    .renderer(stop)
                    .map_err(|e| setup("speech renderer", e))?;
                Ok((transcriber, generator, renderer))
            });

        let (transcriber, generator, renderer) = rest.inspect_err(|_| {
            recorder.cleanup();
            listener.cleanup();
        })?;

        Ok(Self {
            listener,
            recorder,
            transcriber,
            generator,
            synthesizer: SpeechSynthesizer::new(renderer, stop.clone()),
            released: false,
        })
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        self.synthesizer.halt();
        self.recorder.cleanup();
        self.listener.cleanup();
        tracing::debug!("subsystems released");
    }
}

impl Drop for Subsystems {
    fn drop(&mut self) {
        self.release();
    }
}

/// Drives the voice loop on the calling thread
pub struct ConversationTurnController {
    backend: Arc<dyn VoiceBackend>,
    personas: Arc<PersonaPromptStore>,
    board: Arc<StatusBoard>,
    selection: PersonaSelection,
    stop: StopSignal,
    session_id: Uuid,
}

impl ConversationTurnController {
    #[must_use]
    pub fn new(backend: Arc<dyn VoiceBackend>, personas: Arc<PersonaPromptStore>) -> Self {
        Self {
            backend,
            personas,
            board: Arc::new(StatusBoard::new()),
            selection: PersonaSelection::new(crate::persona::DEFAULT_PERSONA),
            stop: StopSignal::new(),
            session_id: Uuid::new_v4(),
        }
    }

    /// Publish state and results to a shared board
    #[must_use]
    pub fn with_board(mut self, board: Arc<StatusBoard>) -> Self {
        self.board = board;
        self
    }

    /// Read the persona from a shared selection
    #[must_use]
    pub fn with_persona_selection(mut self, selection: PersonaSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Observe an externally owned stop signal
    #[must_use]
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    #[must_use]
    pub const fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    #[must_use]
    pub const fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Run the loop until stopped
    ///
    /// # Errors
    ///
    /// Returns error if the options are invalid, a subsystem cannot be set up,
    /// or wake word listening fails
    pub fn run(&self, options: &RunOptions) -> Result<RunSummary> {
        self.run_reporting(options, |_| {})
    }

    /// Run the loop, calling `on_ready` once setup has succeeded or failed
    ///
    /// # Errors
    ///
    /// Same as [`Self::run`]
    pub fn run_reporting<F>(&self, options: &RunOptions, on_ready: F) -> Result<RunSummary>
    where
        F: FnOnce(std::result::Result<(), &Error>),
    {
        let span = tracing::info_span!("voice_run", session_id = %self.session_id);
        let _enter = span.enter();

        let mut subsystems = match self.prepare(options) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!(error = %e, "voice loop setup failed");
                self.stop.stop();
                self.board.set_state(TurnState::Idle);
                self.board.record_error(e.to_string());
                on_ready(Err(&e));
                return Err(e);
            }
        };
        on_ready(Ok(()));

        tracing::info!(
            persona = %options.persona,
            maintain_history = options.maintain_history,
            streaming = options.streaming,
            "voice loop started"
        );

        let result = self.run_loop(&mut subsystems, options);

        subsystems.release();
        self.board.set_state(TurnState::Idle);

        match &result {
            Ok(summary) => tracing::info!(
                turns_started = summary.turns_started,
                turns_completed = summary.turns_completed,
                "voice loop stopped"
            ),
            Err(e) => {
                self.board.record_error(e.to_string());
                tracing::error!(error = %e, "voice loop ended with error");
            }
        }
        result
    }

    fn prepare(&self, options: &RunOptions) -> Result<Subsystems> {
        if options.recipe.trim().is_empty() {
            return Err(Error::InvalidInput("recipe must not be empty".to_string()));
        }
        self.personas.get(&options.persona)?;
        self.selection.set(options.persona.clone());

        Subsystems::acquire(self.backend.as_ref(), &self.stop)
    }

    fn run_loop(&self, subsystems: &mut Subsystems, options: &RunOptions) -> Result<RunSummary> {
        let initial = self.personas.get(&options.persona)?.clone();
        let mut history = options
            .maintain_history
            .then(|| ConversationHistory::seeded(&initial.system_prompt, &options.recipe));
        let mut summary = RunSummary::default();

        loop {
            if self.stop.is_stopped() {
                return Ok(summary);
            }

            self.board.set_state(TurnState::AwaitingWakeWord);
            if !subsystems.listener.detect_once()? || self.stop.is_stopped() {
                continue;
            }

            summary.turns_started += 1;
            let turn_span = tracing::debug_span!("turn", turn = summary.turns_started);
            let _enter = turn_span.enter();

            let turn = TurnContext {
                options,
                fallback: &initial,
                number: summary.turns_completed + 1,
            };
            match self.run_turn(subsystems, history.as_mut(), &turn) {
                Ok(TurnOutcome::Answered) => summary.turns_completed += 1,
                Ok(outcome) => tracing::debug!(?outcome, "turn ended without an answer"),
                Err(e) => {
                    tracing::warn!(error = %e, "turn failed");
                    self.board.record_error(e.to_string());
                }
            }
        }
    }

    fn run_turn(
        &self,
        subsystems: &mut Subsystems,
        history: Option<&mut ConversationHistory>,
        turn: &TurnContext<'_>,
    ) -> Result<TurnOutcome> {
        subsystems.synthesizer.acknowledge();

        self.board.set_state(TurnState::Recording);
        let Some(clip) = subsystems.recorder.record_until_silence()? else {
            return Ok(TurnOutcome::NoSpeech);
        };
        if self.stop.is_stopped() {
            return Ok(TurnOutcome::Stopped);
        }

        self.board.set_state(TurnState::Transcribing);
        let question = subsystems.transcriber.transcribe(clip)?.trim().to_string();
        if self.stop.is_stopped() {
            return Ok(TurnOutcome::Stopped);
        }
        if question.is_empty() {
            tracing::debug!("empty transcription");
            return Ok(TurnOutcome::EmptyTranscript);
        }
        tracing::info!(question = %question, "question heard");

        self.board.set_state(TurnState::Generating);
        let persona = self.current_persona(turn.fallback);
        let messages = match history.as_deref() {
            Some(history) => history.messages_for(&question, &persona.system_prompt),
            None => one_shot_messages(&persona.system_prompt, &turn.options.recipe, &question),
        };

        let Some(answer) = self.generate_and_speak(subsystems, &messages, &persona, turn.options)
        else {
            return Ok(TurnOutcome::NotDelivered);
        };
        if self.stop.is_stopped() {
            return Ok(TurnOutcome::Stopped);
        }

        if let Some(history) = history {
            history.record_exchange(&question, &answer, &persona.system_prompt);
            tracing::trace!(entries = history.len(), "history updated");
        }

        tracing::info!(persona = %persona.id, chars = answer.len(), "answer spoken");
        self.board.publish(TurnResult {
            turn: turn.number,
            question,
            answer,
            persona_id: persona.id,
            completed_at: Utc::now(),
        });

        Ok(TurnOutcome::Answered)
    }

    /// Generate the answer and speak it; `None` if it was not delivered
    ///
    /// When generation fails or any chunk of the answer could not be played
    /// the persona's error utterance is spoken instead.
    fn generate_and_speak(
        &self,
        subsystems: &Subsystems,
        messages: &[ChatMessage],
        persona: &PersonaConfig,
        options: &RunOptions,
    ) -> Option<String> {
        let failure = match self.speak_answer(subsystems, messages, persona, options) {
            Ok(spoken) if spoken.is_clean() => return Some(spoken.text),
            Ok(spoken) => {
                let e = Error::Tts(format!(
                    "{} of {} answer chunks failed to play: {}",
                    spoken.failed_chunks,
                    spoken.chunks,
                    spoken.last_error.unwrap_or_default()
                ));
                tracing::warn!(error = %e, "answer playback failed");
                e
            }
            Err(e) => {
                tracing::warn!(error = %e, "response generation failed");
                e
            }
        };
        self.board.record_error(failure.to_string());

        if !self.stop.is_stopped() {
            self.board.set_state(TurnState::Speaking);
            let apology = subsystems.synthesizer.speak(&persona.error_utterance);
            if !apology.is_clean() {
                tracing::error!("error utterance could not be played");
            }
        }
        None
    }

    fn speak_answer(
        &self,
        subsystems: &Subsystems,
        messages: &[ChatMessage],
        persona: &PersonaConfig,
        options: &RunOptions,
    ) -> Result<Spoken> {
        let params = GenerationParams::from(persona);
        let synthesizer = &subsystems.synthesizer;

        if !options.streaming {
            let answer = subsystems.generator.complete(messages, &params)?;
            if answer.trim().is_empty() {
                return Err(Error::Llm("empty answer".to_string()));
            }
            self.board.set_state(TurnState::Speaking);
            return Ok(synthesizer.speak(&answer));
        }

        let mut stream = subsystems.generator.complete_stream(messages, &params)?;
        self.board.set_state(TurnState::Speaking);

        let mut failure = None;
        let deltas = std::iter::from_fn(|| match stream.next()? {
            Ok(delta) => Some(delta),
            Err(e) => {
                failure = Some(e);
                None
            }
        });
        let spoken = synthesizer.speak_stream(deltas, options.stream_start_threshold);

        if let Some(e) = failure {
            return Err(e);
        }
        if spoken.text.trim().is_empty() {
            return Err(Error::Llm("empty answer".to_string()));
        }
        Ok(spoken)
    }

    /// Persona currently selected, or the run's initial one if it vanished
    fn current_persona(&self, fallback: &PersonaConfig) -> PersonaConfig {
        let id = self.selection.get();
        match self.personas.get(&id) {
            Ok(persona) => persona.clone(),
            Err(e) => {
                tracing::warn!(error = %e, fallback = %fallback.id, "selected persona unavailable");
                fallback.clone()
            }
        }
    }
}

/// Per-turn inputs that do not change within a run
struct TurnContext<'a> {
    options: &'a RunOptions,
    fallback: &'a PersonaConfig,
    number: u64,
}
