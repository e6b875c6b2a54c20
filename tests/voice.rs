//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use heychef::config::AudioConfig;
use heychef::voice::{
    AudioClip, AudioInput, FrameSource, SAMPLE_RATE, SpeechRecorder, SpeechRenderer,
    SpeechSynthesizer, UtteranceSource, VoiceActivityGate, WakeEngine, WakeSource,
    WakeWordListener,
};
use heychef::{Error, Result, StopSignal};

const FRAME: usize = 480;
const LOUD: i16 = 4000;

/// Frames replayed on every `open`
#[derive(Clone)]
struct ScriptedInput {
    frames: Vec<Vec<i16>>,
    /// Fail reads after this many frames instead of ending the stream
    fail_after: Option<usize>,
}

impl ScriptedInput {
    fn new(frames: Vec<Vec<i16>>) -> Self {
        Self {
            frames,
            fail_after: None,
        }
    }
}

struct ScriptedStream {
    frames: VecDeque<Vec<i16>>,
    fail_after: Option<usize>,
    read: usize,
}

impl AudioInput for ScriptedInput {
    fn open(&self, _sample_rate: u32) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(ScriptedStream {
            frames: self.frames.clone().into(),
            fail_after: self.fail_after,
            read: 0,
        }))
    }
}

impl FrameSource for ScriptedStream {
    fn read_frame(&mut self, frame_len: usize) -> Result<Option<Vec<i16>>> {
        if self.fail_after == Some(self.read) {
            return Err(Error::Audio("device unplugged".to_string()));
        }
        self.read += 1;
        Ok(self.frames.pop_front().map(|mut f| {
            f.resize(frame_len, 0);
            f
        }))
    }
}

/// Speech whenever the first sample is non-zero
struct ThresholdGate;

impl VoiceActivityGate for ThresholdGate {
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool> {
        Ok(frame.first().is_some_and(|&s| s != 0))
    }
}

fn speech() -> Vec<i16> {
    vec![LOUD; FRAME]
}

fn silence() -> Vec<i16> {
    vec![0; FRAME]
}

fn frames(pattern: &str) -> Vec<Vec<i16>> {
    pattern
        .chars()
        .map(|c| if c == 'S' { speech() } else { silence() })
        .collect()
}

fn audio_config(max_silence_secs: f32) -> AudioConfig {
    AudioConfig {
        max_silence_secs,
        ..AudioConfig::default()
    }
}

fn recorder(input: ScriptedInput, max_silence_secs: f32, stop: StopSignal) -> SpeechRecorder {
    SpeechRecorder::new(
        Box::new(input),
        Box::new(ThresholdGate),
        &audio_config(max_silence_secs),
        stop,
    )
}

#[test]
fn test_recorder_drops_leading_silence_and_stops_after_limit() {
    // 0.09s of 30ms frames gives a limit of 3 silent frames
    let input = ScriptedInput::new(frames("___SS_S____SSSS"));
    let mut recorder = recorder(input, 0.09, StopSignal::new());
    assert_eq!(recorder.silence_limit(), 3);

    let clip = recorder.record_until_silence().unwrap().unwrap();

    // S S _ S then four silent frames, the fourth exceeding the limit
    assert_eq!(clip.len(), 8 * FRAME);
    assert_eq!(clip.sample_rate(), SAMPLE_RATE);
    assert!(clip.samples()[..FRAME].iter().all(|&s| s == LOUD));
}

#[test]
fn test_recorder_resets_silence_run_on_speech() {
    let input = ScriptedInput::new(frames("S___S___S____"));
    let mut recorder = recorder(input, 0.09, StopSignal::new());

    let clip = recorder.record_until_silence().unwrap().unwrap();
    assert_eq!(clip.len(), 13 * FRAME);
}

#[test]
fn test_recorder_returns_none_without_speech() {
    let input = ScriptedInput::new(frames("__________"));
    let mut recorder = recorder(input, 0.09, StopSignal::new());

    assert!(recorder.record_until_silence().unwrap().is_none());
}

#[test]
fn test_recorder_keeps_speech_when_stream_ends() {
    let input = ScriptedInput::new(frames("_SS_"));
    let mut recorder = recorder(input, 1.0, StopSignal::new());

    let clip = recorder.record_until_silence().unwrap().unwrap();
    assert_eq!(clip.len(), 3 * FRAME);
}

#[test]
fn test_recorder_keeps_speech_on_read_error() {
    let input = ScriptedInput {
        frames: frames("SSSS"),
        fail_after: Some(2),
    };
    let mut recorder = recorder(input, 1.0, StopSignal::new());

    let clip = recorder.record_until_silence().unwrap().unwrap();
    assert_eq!(clip.len(), 2 * FRAME);
}

#[test]
fn test_recorder_returns_none_when_stopped() {
    let stop = StopSignal::new();
    stop.stop();
    let input = ScriptedInput::new(frames("SSSS____"));
    let mut recorder = recorder(input, 0.09, stop);

    assert!(recorder.record_until_silence().unwrap().is_none());
}

/// Fires on the given frame index
struct CountingEngine {
    fire_at: usize,
    seen: usize,
}

impl WakeEngine for CountingEngine {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn frame_length(&self) -> usize {
        512
    }

    fn process(&mut self, frame: &[i16]) -> Result<i32> {
        assert_eq!(frame.len(), 512);
        self.seen += 1;
        Ok(if self.seen == self.fire_at { 0 } else { -1 })
    }
}

#[test]
fn test_listener_detects_wake_word() {
    let input = ScriptedInput::new(frames("__________"));
    let engine = CountingEngine { fire_at: 4, seen: 0 };
    let mut listener = WakeWordListener::new(Box::new(input), Box::new(engine), StopSignal::new());

    assert!(listener.detect_once().unwrap());
    listener.cleanup();
    listener.cleanup();
}

#[test]
fn test_listener_stream_end_is_an_error() {
    let input = ScriptedInput::new(frames("___"));
    let engine = CountingEngine { fire_at: 100, seen: 0 };
    let mut listener = WakeWordListener::new(Box::new(input), Box::new(engine), StopSignal::new());

    assert!(matches!(listener.detect_once(), Err(Error::WakeWord(_))));
}

#[test]
fn test_listener_returns_false_when_stopped() {
    let stop = StopSignal::new();
    stop.stop();
    let input = ScriptedInput::new(frames("______"));
    let engine = CountingEngine { fire_at: 1, seen: 0 };
    let mut listener = WakeWordListener::new(Box::new(input), Box::new(engine), stop);

    assert!(!listener.detect_once().unwrap());
}

#[test]
fn test_listener_after_cleanup_is_an_error() {
    let input = ScriptedInput::new(frames("______"));
    let engine = CountingEngine { fire_at: 1, seen: 0 };
    let mut listener = WakeWordListener::new(Box::new(input), Box::new(engine), StopSignal::new());

    listener.cleanup();
    assert!(listener.detect_once().is_err());
}

/// Records every chunk it is asked to speak
#[derive(Clone, Default)]
struct CollectingRenderer {
    chunks: Arc<Mutex<Vec<String>>>,
}

impl SpeechRenderer for CollectingRenderer {
    fn render_and_play(&self, text: &str) -> Result<()> {
        self.chunks.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn synthesizer(stop: StopSignal) -> (SpeechSynthesizer, Arc<Mutex<Vec<String>>>) {
    let renderer = CollectingRenderer::default();
    let chunks = Arc::clone(&renderer.chunks);
    (SpeechSynthesizer::new(Box::new(renderer), stop), chunks)
}

#[test]
fn test_stream_flushes_at_last_sentence_end() {
    // 85 characters arriving at once, sentence end at 60
    let text = format!("{}. {}", "a".repeat(59), "b".repeat(24));
    assert_eq!(text.len(), 85);
    let (synth, chunks) = synthesizer(StopSignal::new());

    let spoken = synth.speak_stream([text.clone()], 80);

    let chunks = chunks.lock().unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].len(), 61);
    assert!(chunks[0].ends_with(". "));
    assert_eq!(chunks[1], "b".repeat(24));
    assert_eq!(spoken.text, text);
    assert!(spoken.is_clean());
}

#[test]
fn test_short_stream_is_flushed_once_at_end() {
    let (synth, chunks) = synthesizer(StopSignal::new());

    let deltas = ["Stir ", "gently. ", "Serve."].map(String::from);
    let spoken = synth.speak_stream(deltas, 80);

    assert_eq!(*chunks.lock().unwrap(), vec!["Stir gently. Serve."]);
    assert_eq!(spoken.text, "Stir gently. Serve.");
    assert_eq!(spoken.chunks, 1);
}

#[test]
fn test_streamed_chunks_concatenate_to_full_text() {
    let answer = "Heat a pan over medium heat. Add a knob of butter, then pour in a ladle \
                  of batter! Cook until bubbles form, about two minutes? Flip and cook the \
                  other side, then serve warm with lemon and sugar.";
    let deltas: Vec<String> = answer
        .split_inclusive(' ')
        .map(String::from)
        .collect();
    let (synth, chunks) = synthesizer(StopSignal::new());

    let spoken = synth.speak_stream(deltas, 30);

    let chunks = chunks.lock().unwrap();
    assert!(chunks.len() >= 3);
    assert_eq!(chunks.concat(), answer);
    assert_eq!(spoken.text, answer);
    assert_eq!(spoken.chunks, chunks.len());
}

#[test]
fn test_stopped_synthesizer_speaks_nothing() {
    let stop = StopSignal::new();
    stop.stop();
    let (synth, chunks) = synthesizer(stop);

    let spoken = synth.speak("This should never be heard.");
    assert!(chunks.lock().unwrap().is_empty());
    assert_eq!(spoken.chunks, 0);
}

/// Fails the first chunk, plays the rest
#[derive(Clone, Default)]
struct FlakyRenderer {
    chunks: Arc<Mutex<Vec<String>>>,
}

impl SpeechRenderer for FlakyRenderer {
    fn render_and_play(&self, text: &str) -> Result<()> {
        let mut chunks = self.chunks.lock().unwrap();
        chunks.push(text.to_string());
        if chunks.len() == 1 {
            return Err(Error::Tts("renderer timed out".to_string()));
        }
        Ok(())
    }
}

#[test]
fn test_failed_chunk_does_not_silence_the_rest() {
    let text = format!("{}. {}", "a".repeat(59), "b".repeat(24));
    let renderer = FlakyRenderer::default();
    let chunks = Arc::clone(&renderer.chunks);
    let synth = SpeechSynthesizer::new(Box::new(renderer), StopSignal::new());

    let spoken = synth.speak_stream([text.clone()], 80);

    let chunks = chunks.lock().unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[1], "b".repeat(24));
    assert_eq!(spoken.text, text);
    assert_eq!(spoken.chunks, 2);
    assert_eq!(spoken.failed_chunks, 1);
    assert!(!spoken.is_clean());
    assert!(spoken.last_error.unwrap().contains("renderer timed out"));
}

#[test]
fn test_complete_answer_splits_once_at_last_sentence_end() {
    let (synth, chunks) = synthesizer(StopSignal::new());
    let answer = "Preheat the oven to 200 degrees. Grease the tin generously, then pour in the batter.";

    let spoken = synth.speak(answer);

    assert_eq!(
        *chunks.lock().unwrap(),
        vec![
            "Preheat the oven to 200 degrees. ",
            "Grease the tin generously, then pour in the batter."
        ]
    );
    assert_eq!(spoken.text, answer);
}

#[test]
fn test_short_complete_answer_is_one_utterance() {
    let (synth, chunks) = synthesizer(StopSignal::new());

    synth.speak("Two eggs. Room temperature.");

    assert_eq!(*chunks.lock().unwrap(), vec!["Two eggs. Room temperature."]);
}

#[test]
fn test_clip_wav_header() {
    let samples: Vec<i16> = (0..1600).map(|i| ((i % 100) * 100) as i16).collect();
    let clip = AudioClip::new(samples.clone(), SAMPLE_RATE);

    let wav = clip.to_wav().unwrap();
    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");

    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.len() as usize, samples.len());
}

#[test]
fn test_clip_duration() {
    let clip = AudioClip::new(vec![0; 8000], SAMPLE_RATE);
    assert!((clip.duration_secs() - 0.5).abs() < f32::EPSILON);
}
