//! Audio capture from microphone
//!
//! A stream is opened per use and dropped when its owner is done, so the wake
//! listener and the recorder never hold the device at the same time.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::clip::f32_to_i16;
use crate::{Error, Result};

/// Longest wait for the device to deliver one frame
const FRAME_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval while waiting for samples
const RECV_POLL: Duration = Duration::from_millis(50);

/// A readable stream of fixed-size mono i16 frames
pub trait FrameSource {
    /// Read exactly `frame_len` samples
    ///
    /// Returns `Ok(None)` when the stream has ended.
    ///
    /// # Errors
    ///
    /// Returns error if the device fails or stalls
    fn read_frame(&mut self, frame_len: usize) -> Result<Option<Vec<i16>>>;
}

/// Something that can open a microphone stream
pub trait AudioInput {
    /// Open a mono stream at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the device is unavailable or rejects the format
    fn open(&self, sample_rate: u32) -> Result<Box<dyn FrameSource>>;
}

/// The default input device
#[derive(Debug, Default, Clone, Copy)]
pub struct Microphone;

impl Microphone {
    /// Check that an input device exists
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "microphone available"
        );
        Ok(Self)
    }

    fn stream_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
        let rate = SampleRate(sample_rate);
        let supports = |c: &cpal::SupportedStreamConfigRange, channels| {
            c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
        };

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| supports(c, 1))
            .or_else(|| {
                // Fallback: stereo, downmixed in the callback
                device.supported_input_configs().ok()?.find(|c| supports(c, 2))
            })
            .ok_or_else(|| {
                Error::Audio(format!("no input config supports {sample_rate} Hz"))
            })?;

        Ok(supported.with_sample_rate(rate).config())
    }
}

impl AudioInput for Microphone {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn FrameSource>> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let config = Self::stream_config(&device, sample_rate)?;
        let channels = usize::from(config.channels.max(1));
        let (tx, rx) = mpsc::channel::<Vec<i16>>();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<i16> = data
                        .chunks(channels)
                        .map(|frame| {
                            #[allow(clippy::cast_precision_loss)]
                            let avg = frame.iter().sum::<f32>() / frame.len() as f32;
                            f32_to_i16(avg)
                        })
                        .collect();
                    // Receiver gone means the owner closed the stream
                    let _ = tx.send(mono);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(sample_rate, channels, "microphone stream opened");
        Ok(Box::new(MicStream {
            _stream: stream,
            rx,
            pending: VecDeque::new(),
        }))
    }
}

/// An open capture stream; dropping it releases the device
struct MicStream {
    _stream: Stream,
    rx: Receiver<Vec<i16>>,
    pending: VecDeque<i16>,
}

impl FrameSource for MicStream {
    fn read_frame(&mut self, frame_len: usize) -> Result<Option<Vec<i16>>> {
        let started = Instant::now();

        while self.pending.len() < frame_len {
            match self.rx.recv_timeout(RECV_POLL) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    if started.elapsed() > FRAME_STALL_TIMEOUT {
                        return Err(Error::Audio("microphone stopped delivering audio".into()));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }

        Ok(Some(self.pending.drain(..frame_len).collect()))
    }
}

impl Drop for MicStream {
    fn drop(&mut self) {
        tracing::debug!("microphone stream closed");
    }
}
