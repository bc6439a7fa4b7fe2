//! Microphone capture via CPAL.
//!
//! The capture stream delivers fixed-size chunks (default 480 samples = 30ms
//! at 16kHz, the frame size the VAD expects) over a std channel to the
//! recognizer's capture thread. `cpal::Stream` is not `Send`, so the stream
//! must be built and kept alive on that thread.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use std::sync::mpsc::Sender;
use tracing::{info, warn};

/// Capture configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz (default 16000).
    pub sample_rate: u32,
    /// Channel count (default 1, mono).
    pub channels: u16,
    /// Chunk size in samples (default 480 = 30ms at 16kHz).
    pub chunk_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 480,
        }
    }
}

/// One fixed-size chunk of captured PCM (f32, -1.0..1.0).
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
}

/// Microphone capture on the default input device.
pub struct AudioCapture {
    config: AudioConfig,
    device: Device,
    stream_config: StreamConfig,
}

impl AudioCapture {
    /// Check that an input device exists without opening it. Used once at
    /// startup to report recognition-unavailable.
    pub fn probe() -> VoiceResult<()> {
        cpal::default_host()
            .default_input_device()
            .map(|_| ())
            .ok_or_else(|| VoiceError::AudioDevice("no input device available".to_string()))
    }

    /// Open the default input device with the given configuration.
    pub fn open(config: AudioConfig) -> VoiceResult<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("no input device available".to_string()))?;

        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate = config.sample_rate,
            "opening input device"
        );

        // Probe the default config so an unusable device fails here, not at
        // stream build time.
        let _ = device.default_input_config()?;

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.chunk_size as u32),
        };

        Ok(Self {
            config,
            device,
            stream_config,
        })
    }

    /// Build and start the input stream, re-chunking callback buffers into
    /// exactly `chunk_size` samples per `AudioChunk`. The returned `Stream`
    /// must be kept alive for capture to continue; drop it to stop.
    pub fn stream_into(self, chunk_tx: Sender<AudioChunk>) -> VoiceResult<Stream> {
        let chunk_size = self.config.chunk_size;
        let mut pending = Vec::with_capacity(chunk_size);

        let stream = self.device.build_input_stream(
            &self.stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    pending.push(sample);
                    if pending.len() >= chunk_size {
                        let chunk = AudioChunk {
                            samples: std::mem::replace(
                                &mut pending,
                                Vec::with_capacity(chunk_size),
                            ),
                        };
                        // Receiver gone means the recognizer was disarmed;
                        // the stream is about to be dropped anyway.
                        let _ = chunk_tx.send(chunk);
                    }
                }
            },
            move |err| {
                warn!("audio stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;
        Ok(stream)
    }

    /// Names of the available input devices.
    pub fn input_devices() -> VoiceResult<Vec<String>> {
        let devices = cpal::default_host().input_devices()?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}
