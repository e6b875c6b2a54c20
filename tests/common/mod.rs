//! Shared test utilities
//!
//! `ScriptedBackend` replaces the microphone, speech services and language
//! model with a script, and records what the voice loop did with them.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use heychef::history::ChatMessage;
use heychef::llm::{GenerationParams, ResponseGenerator, TextStream};
use heychef::turn::PersonaSelection;
use heychef::voice::{AudioClip, SpeechRenderer, Transcriber, UtteranceSource, WakeSource};
use heychef::{Error, PersonaPromptStore, Result, StopSignal, VoiceBackend};

pub const RECIPE: &str = "Pancakes: 200g flour, 2 eggs, 300ml milk. Whisk and fry.";

/// What the wake listener does on one call
#[derive(Debug, Clone, Copy)]
pub enum WakeStep {
    Detect,
    /// Wait until the stop signal is set
    Block,
    Fail,
}

/// What the generator returns for one turn
#[derive(Debug, Clone)]
pub enum Answer {
    Text(String),
    Fail,
    /// Stream this many deltas of the text, then fail
    FailAfter(String, usize),
}

/// Subsystem whose construction fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Listener,
    Recorder,
    Transcriber,
    Generator,
    Renderer,
}

#[derive(Debug, Default)]
pub struct Script {
    pub wake: VecDeque<WakeStep>,
    pub transcripts: VecDeque<std::result::Result<String, String>>,
    pub answers: VecDeque<Answer>,
    pub fail_at: Option<Stage>,
    /// Characters per streamed delta
    pub delta_len: usize,
    /// Persona to select while transcribing the given (1-based) turn
    pub persona_switch: Option<(usize, PersonaSelection, String)>,
    /// Render calls (0-based, across the whole run) that fail
    pub failing_renders: Vec<usize>,
}

/// Observations made while the loop ran
#[derive(Debug, Default)]
pub struct Record {
    pub listeners_built: usize,
    pub recorders_built: usize,
    pub listener_cleanups: usize,
    pub recorder_cleanups: usize,
    pub halts: usize,
    pub acknowledgements: usize,
    pub transcriptions: usize,
    pub requests: Vec<Vec<ChatMessage>>,
    /// Every chunk handed to the renderer, including failed ones
    pub spoken: Vec<String>,
    pub failed_renders: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    record: Arc<Mutex<Record>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap()
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            record: Arc::new(Mutex::new(Record::default())),
        }
    }

    /// One detected wake word per answer, each answered successfully
    pub fn answering(exchanges: &[(&str, &str)]) -> Self {
        Self::new(Script {
            wake: exchanges.iter().map(|_| WakeStep::Detect).collect(),
            transcripts: exchanges.iter().map(|(q, _)| Ok((*q).to_string())).collect(),
            answers: exchanges
                .iter()
                .map(|(_, a)| Answer::Text((*a).to_string()))
                .collect(),
            ..Script::default()
        })
    }

    pub fn record(&self) -> MutexGuard<'_, Record> {
        lock(&self.record)
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        lock(&self.script)
    }

    fn fails_at(&self, stage: Stage) -> Result<()> {
        if self.script().fail_at == Some(stage) {
            return Err(Error::Audio(format!("{stage:?} unavailable")));
        }
        Ok(())
    }
}

impl VoiceBackend for ScriptedBackend {
    fn wake_listener(&self, stop: &StopSignal) -> Result<Box<dyn WakeSource>> {
        self.fails_at(Stage::Listener)?;
        self.record().listeners_built += 1;
        Ok(Box::new(ScriptedListener {
            backend: self.clone(),
            stop: stop.clone(),
        }))
    }

    fn recorder(&self, _stop: &StopSignal) -> Result<Box<dyn UtteranceSource>> {
        self.fails_at(Stage::Recorder)?;
        self.record().recorders_built += 1;
        Ok(Box::new(ScriptedRecorder(self.clone())))
    }

    fn transcriber(&self) -> Result<Box<dyn Transcriber>> {
        self.fails_at(Stage::Transcriber)?;
        Ok(Box::new(ScriptedTranscriber(self.clone())))
    }

    fn generator(&self) -> Result<Box<dyn ResponseGenerator>> {
        self.fails_at(Stage::Generator)?;
        Ok(Box::new(ScriptedGenerator(self.clone())))
    }

    fn renderer(&self, _stop: &StopSignal) -> Result<Box<dyn SpeechRenderer>> {
        self.fails_at(Stage::Renderer)?;
        Ok(Box::new(ScriptedRenderer(self.clone())))
    }
}

struct ScriptedListener {
    backend: ScriptedBackend,
    stop: StopSignal,
}

impl WakeSource for ScriptedListener {
    fn detect_once(&mut self) -> Result<bool> {
        let step = self.backend.script().wake.pop_front();
        match step {
            Some(WakeStep::Detect) => Ok(true),
            Some(WakeStep::Block) => {
                while !self.stop.sleep(Duration::from_millis(50)) {}
                Ok(false)
            }
            Some(WakeStep::Fail) => Err(Error::WakeWord("input stream ended".to_string())),
            // Script exhausted: behave like a user pressing stop
            None => {
                self.stop.stop();
                Ok(false)
            }
        }
    }

    fn cleanup(&mut self) {
        self.backend.record().listener_cleanups += 1;
    }
}

struct ScriptedRecorder(ScriptedBackend);

impl UtteranceSource for ScriptedRecorder {
    fn record_until_silence(&mut self) -> Result<Option<AudioClip>> {
        Ok(Some(AudioClip::new(vec![1200; 1600], 16_000)))
    }

    fn cleanup(&mut self) {
        self.0.record().recorder_cleanups += 1;
    }
}

struct ScriptedTranscriber(ScriptedBackend);

impl Transcriber for ScriptedTranscriber {
    fn transcribe(&self, _clip: AudioClip) -> Result<String> {
        let turn = {
            let mut record = self.0.record();
            record.transcriptions += 1;
            record.transcriptions
        };

        let mut script = self.0.script();
        if let Some((at, selection, id)) = &script.persona_switch
            && *at == turn
        {
            selection.set(id.clone());
        }

        match script.transcripts.pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(Error::Stt(message)),
            None => Ok(String::new()),
        }
    }
}

struct ScriptedGenerator(ScriptedBackend);

impl ScriptedGenerator {
    fn next_answer(&self, messages: &[ChatMessage]) -> Result<(String, Option<usize>)> {
        self.0.record().requests.push(messages.to_vec());
        match self.0.script().answers.pop_front() {
            Some(Answer::Text(text)) => Ok((text, None)),
            Some(Answer::FailAfter(text, deltas)) => Ok((text, Some(deltas))),
            Some(Answer::Fail) | None => Err(Error::Llm("model unavailable".to_string())),
        }
    }
}

impl ResponseGenerator for ScriptedGenerator {
    fn complete(&self, messages: &[ChatMessage], _params: &GenerationParams) -> Result<String> {
        match self.next_answer(messages)? {
            (text, None) => Ok(text),
            (_, Some(_)) => Err(Error::Llm("connection reset".to_string())),
        }
    }

    fn complete_stream(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<TextStream> {
        let (answer, fail_after) = self.next_answer(messages)?;
        let delta_len = self.0.script().delta_len.max(1);
        let chars: Vec<char> = answer.chars().collect();
        let mut deltas: Vec<Result<String>> = chars
            .chunks(delta_len)
            .map(|c| Ok(c.iter().collect()))
            .collect();
        if let Some(n) = fail_after {
            deltas.truncate(n);
            deltas.push(Err(Error::Llm("connection reset".to_string())));
        }
        Ok(Box::new(deltas.into_iter()))
    }
}

struct ScriptedRenderer(ScriptedBackend);

impl SpeechRenderer for ScriptedRenderer {
    fn render_and_play(&self, text: &str) -> Result<()> {
        let call = {
            let mut record = self.0.record();
            record.spoken.push(text.to_string());
            record.spoken.len() - 1
        };
        if self.0.script().failing_renders.contains(&call) {
            self.0.record().failed_renders += 1;
            return Err(Error::Tts("speaker disconnected".to_string()));
        }
        Ok(())
    }

    fn halt(&self) {
        self.0.record().halts += 1;
    }

    fn acknowledge(&self) {
        self.0.record().acknowledgements += 1;
    }
}

pub fn personas() -> Arc<PersonaPromptStore> {
    Arc::new(PersonaPromptStore::builtin().unwrap())
}
