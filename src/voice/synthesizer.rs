//! Incremental speech synthesis
//!
//! `speak_stream` starts talking before the full answer is known. Deltas are
//! buffered until the buffer reaches the start threshold, then the longest
//! prefix ending at a sentence (or failing that, a comma) boundary is rendered
//! and played while the rest stays buffered. Chunks are played strictly one
//! after another.

use super::tts::SpeechRenderer;
use crate::turn::StopSignal;

/// Boundaries closer to the buffer start than this many characters are ignored
pub const MIN_FLUSH_OFFSET: usize = 20;

const SENTENCE_ENDS: [&str; 3] = [". ", "! ", "? "];
const CLAUSE_END: &str = ", ";

/// Byte length of the chunk to flush from `buffer`
///
/// Picks the sentence end nearest the end of the buffer, then the nearest
/// comma, each only if it starts at least `MIN_FLUSH_OFFSET` characters in.
/// Falls back to the whole buffer.
#[must_use]
pub fn flush_point(buffer: &str) -> usize {
    let boundary = |patterns: &[&str]| {
        patterns
            .iter()
            .filter_map(|p| buffer.rfind(p).map(|pos| pos + p.len()))
            .filter(|&end| buffer[..end].chars().count() >= MIN_FLUSH_OFFSET + 2)
            .max()
    };

    boundary(&SENTENCE_ENDS)
        .or_else(|| boundary(&[CLAUSE_END]))
        .unwrap_or(buffer.len())
}

/// What a speech call actually played
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Spoken {
    /// Every character received, whether or not it was heard
    pub text: String,

    /// Chunks handed to the renderer
    pub chunks: usize,

    /// Chunks whose rendering or playback failed
    pub failed_chunks: usize,

    /// Error of the most recent failed chunk
    pub last_error: Option<String>,
}

impl Spoken {
    /// True when every chunk was rendered and played
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed_chunks == 0
    }
}

/// Plays text through a renderer, chunk by chunk
pub struct SpeechSynthesizer {
    renderer: Box<dyn SpeechRenderer>,
    stop: StopSignal,
}

impl SpeechSynthesizer {
    #[must_use]
    pub fn new(renderer: Box<dyn SpeechRenderer>, stop: StopSignal) -> Self {
        Self { renderer, stop }
    }

    #[must_use]
    pub fn renderer(&self) -> &dyn SpeechRenderer {
        self.renderer.as_ref()
    }

    /// Speak a complete answer
    ///
    /// Split once at its last sentence (or comma) boundary, so a long answer
    /// starts playing after the first part is rendered.
    pub fn speak(&self, text: &str) -> Spoken {
        self.speak_stream(std::iter::once(text.to_string()), 0)
    }

    /// Speak text deltas as they arrive
    ///
    /// Each arriving delta flushes at most one chunk once the buffer holds
    /// `start_threshold` characters; whatever is left is flushed at the end.
    /// Render failures are logged and counted per chunk and do not stop later
    /// chunks. Once the stop signal is set no further chunks are played and
    /// the text received so far is returned.
    pub fn speak_stream<I>(&self, deltas: I, start_threshold: usize) -> Spoken
    where
        I: IntoIterator<Item = String>,
    {
        let mut spoken = Spoken::default();
        let mut buffer = String::new();

        for delta in deltas {
            if self.stop.is_stopped() {
                break;
            }

            spoken.text.push_str(&delta);
            buffer.push_str(&delta);

            if !buffer.is_empty() && buffer.chars().count() >= start_threshold {
                let split = flush_point(&buffer);
                let rest = buffer.split_off(split);
                let chunk = std::mem::replace(&mut buffer, rest);
                self.flush(&chunk, &mut spoken);
            }
        }

        if !buffer.is_empty() && !self.stop.is_stopped() {
            self.flush(&buffer, &mut spoken);
        }

        tracing::debug!(
            chars = spoken.text.len(),
            chunks = spoken.chunks,
            failed = spoken.failed_chunks,
            "speech complete"
        );
        spoken
    }

    fn flush(&self, chunk: &str, spoken: &mut Spoken) {
        spoken.chunks += 1;
        tracing::trace!(chunk, "flushing speech chunk");

        if let Err(e) = self.renderer.render_and_play(chunk) {
            // Playback cut short by a stop is not a failure
            if self.stop.is_stopped() {
                return;
            }
            tracing::warn!(error = %e, "speech chunk failed");
            spoken.failed_chunks += 1;
            spoken.last_error = Some(e.to_string());
        }
    }

    /// Play the wake acknowledgement without waiting for it
    pub fn acknowledge(&self) {
        self.renderer.acknowledge();
    }

    /// Stop any playback still running
    pub fn halt(&self) {
        self.renderer.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_point_prefers_last_sentence_end() {
        let text = "Preheat the oven to 200 degrees. Grease the pan well! Then wait";
        let end = flush_point(text);
        assert_eq!(&text[..end], "Preheat the oven to 200 degrees. Grease the pan well! ");
    }

    #[test]
    fn flush_point_ignores_early_boundaries() {
        // Sentence end too close to the start, comma far enough in
        let text = "Yes. Add the salt now, then stir";
        let end = flush_point(text);
        assert_eq!(&text[..end], "Yes. Add the salt now, ");
    }

    #[test]
    fn flush_point_falls_back_to_whole_buffer() {
        let text = "Ok. Fine, whisk it all together until smooth";
        assert_eq!(flush_point(text), text.len());
    }

    #[test]
    fn flush_point_counts_characters_not_bytes() {
        // 19 multi-byte characters before the period: too early
        let text = "ééééééééééééééééééé. rest of the sentence";
        assert_eq!(flush_point(text), text.len());
    }
}
