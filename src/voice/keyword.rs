//! Rustpotter keyword spotter

use std::path::Path;

use rustpotter::{Rustpotter, RustpotterConfig, SampleFormat};

use super::clip::i16_to_f32;
use super::wake_word::WakeEngine;
use crate::{Error, Result};

/// Key the loaded wake word is registered under
const WAKEWORD_KEY: &str = "hey_chef";

/// Keyword spotter loaded from a `.rpw` model
pub struct KeywordEngine {
    detector: Rustpotter,
    sample_rate: u32,
    buffer: Vec<f32>,
}

impl KeywordEngine {
    /// # Errors
    ///
    /// Returns error if the model is missing or the detector refuses to load it
    pub fn new(model_path: &Path, sample_rate: u32, threshold: f32) -> Result<Self> {
        if !model_path.exists() {
            return Err(Error::WakeWord(format!(
                "wake word model not found: {}",
                model_path.display()
            )));
        }

        let mut config = RustpotterConfig::default();
        config.fmt.sample_rate = sample_rate as usize;
        config.fmt.channels = 1;
        config.fmt.sample_format = SampleFormat::F32;
        config.detector.threshold = threshold;

        let mut detector = Rustpotter::new(&config)
            .map_err(|e| Error::WakeWord(format!("failed to create detector: {e}")))?;
        detector
            .add_wakeword_from_file(WAKEWORD_KEY, &model_path.to_string_lossy())
            .map_err(|e| Error::WakeWord(format!("failed to load wake word model: {e}")))?;

        tracing::info!(
            model = %model_path.display(),
            threshold,
            frame_length = detector.get_samples_per_frame(),
            "keyword spotter loaded"
        );

        Ok(Self {
            detector,
            sample_rate,
            buffer: Vec::new(),
        })
    }
}

impl WakeEngine for KeywordEngine {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_length(&self) -> usize {
        self.detector.get_samples_per_frame()
    }

    fn process(&mut self, frame: &[i16]) -> Result<i32> {
        self.buffer.clear();
        self.buffer.extend(frame.iter().copied().map(i16_to_f32));
        Ok(if self.detector.process_f32(&self.buffer).is_some() {
            0
        } else {
            -1
        })
    }
}
