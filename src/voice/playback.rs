//! Audio playback to speakers

use std::f32::consts::TAU;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::turn::StopSignal;
use crate::{Error, Result};

/// Poll interval while waiting for playback to drain
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Acknowledgement chime: pitch, length and loudness
const CHIME_HZ: f32 = 880.0;
const CHIME_MS: u32 = 150;
const CHIME_GAIN: f32 = 0.25;
const CHIME_SAMPLE_RATE: u32 = 24_000;

/// Plays audio to the default output device
///
/// Playback blocks until the samples drain or the stop signal is set.
#[derive(Debug, Clone)]
pub struct AudioPlayback {
    stop: StopSignal,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new(stop: StopSignal) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self { stop })
    }

    fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
        let rate = SampleRate(sample_rate);
        let supports = |c: &cpal::SupportedStreamConfigRange, channels| {
            c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
        };

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| supports(c, 1))
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| supports(c, 2))
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        Ok(supported.with_sample_rate(rate).config())
    }

    /// Play mono f32 samples, blocking until done or stopped
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be opened
    pub fn play_samples(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        if samples.is_empty() || self.stop.is_stopped() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let config = Self::output_config(&device, sample_rate)?;
        let channels = usize::from(config.channels.max(1));

        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).copied().unwrap_or_else(|| {
                                finished.store(true, Ordering::Release);
                                0.0
                            });
                            frame.fill(sample);
                            pos = (pos + 1).min(samples.len());
                        }
                        position.store(pos, Ordering::Relaxed);
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (samples.len() as u64 * 1000) / u64::from(sample_rate.max(1));
        let timeout = Duration::from_millis(duration_ms + 500);
        let start = Instant::now();

        while !finished.load(Ordering::Acquire) {
            if self.stop.is_stopped() {
                tracing::debug!("playback halted");
                break;
            }
            if start.elapsed() > timeout {
                tracing::warn!("playback did not drain in time");
                break;
            }
            std::thread::sleep(DRAIN_POLL);
        }

        drop(stream);
        tracing::debug!(samples = samples.len(), "playback complete");
        Ok(())
    }

    /// Play audio from MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub fn play_mp3(&self, mp3_data: &[u8]) -> Result<()> {
        let (samples, sample_rate) = decode_mp3(mp3_data)?;
        self.play_samples(samples, sample_rate)
    }

    /// Play the short acknowledgement tone
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub fn play_chime(&self) -> Result<()> {
        self.play_samples(chime_samples(CHIME_SAMPLE_RATE), CHIME_SAMPLE_RATE)
    }
}

/// A sine tone with a linear fade in and out
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn chime_samples(sample_rate: u32) -> Vec<f32> {
    let len = (sample_rate * CHIME_MS / 1000) as usize;
    let fade = (len / 10).max(1);

    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let envelope = (i.min(len - 1 - i).min(fade) as f32) / fade as f32;
            (TAU * CHIME_HZ * t).sin() * CHIME_GAIN * envelope
        })
        .collect()
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 24_000u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                let channels = frame.channels.max(1);

                // Average channels down to mono
                #[allow(clippy::cast_precision_loss)]
                samples.extend(frame.data.chunks(channels).map(|chunk| {
                    chunk.iter().map(|&s| f32::from(s) / 32768.0).sum::<f32>()
                        / chunk.len() as f32
                }));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chime_has_expected_length_and_fades() {
        let samples = chime_samples(24_000);
        assert_eq!(samples.len(), 3_600);
        assert!(samples[0].abs() < f32::EPSILON);
        assert!(samples.last().unwrap().abs() < 0.01);
        assert!(samples.iter().all(|s| s.abs() <= CHIME_GAIN));
    }

    #[test]
    fn empty_mp3_decodes_to_nothing() {
        let (samples, _) = decode_mp3(&[]).unwrap();
        assert!(samples.is_empty());
    }
}
