//! Utterance endpointing: WebRTC VAD plus a small gap state machine.
//!
//! Fed 30ms chunks, the endpointer buffers speech and commits one utterance
//! segment once silence has lasted `gap` after speech. Segments shorter than
//! `min_speech` are dropped; a turn running past `max_turn` is committed
//! early. This is the recognition capability's own endpointing — the turn
//! controller applies its separate 2000ms batching window downstream.

use crate::error::{VoiceError, VoiceResult};
use std::time::{Duration, Instant};
use tracing::debug;
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Endpointer configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Sample rate (8000/16000/32000/48000 for WebRTC VAD; default 16000).
    pub sample_rate: u32,
    /// VAD aggressiveness 0-3 (default 2).
    pub vad_mode: u8,
    /// Silence after speech before the segment is committed (default 800ms).
    pub gap: Duration,
    /// Minimum speech length for a valid segment (default 200ms).
    pub min_speech: Duration,
    /// Auto-commit a segment that runs this long (default 30s).
    pub max_turn: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            vad_mode: 2,
            gap: Duration::from_millis(800),
            min_speech: Duration::from_millis(200),
            max_turn: Duration::from_secs(30),
        }
    }
}

/// Signals emitted while consuming chunks.
#[derive(Debug)]
pub enum EndpointSignal {
    /// Transition from silence into speech.
    SpeechStarted,
    /// A complete segment: buffered PCM plus approximate speech duration.
    Committed {
        samples: Vec<f32>,
        duration: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Speaking,
    Gap,
}

/// Chunk-by-chunk endpointer. Owns the VAD instance, so it lives on the
/// capture thread (`webrtc_vad::Vad` is not `Send`).
pub struct SpeechEndpointer {
    config: EndpointConfig,
    vad: Vad,
    chunk_size: usize,
    phase: Phase,
    buffer: Vec<f32>,
    speech_start: Option<Instant>,
    last_speech: Option<Instant>,
}

fn vad_mode_for(mode: u8) -> VadMode {
    match mode {
        0 => VadMode::Quality,
        1 => VadMode::LowBitrate,
        2 => VadMode::Aggressive,
        _ => VadMode::VeryAggressive,
    }
}

impl SpeechEndpointer {
    pub fn new(config: EndpointConfig) -> VoiceResult<Self> {
        let sample_rate = match config.sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            other => {
                return Err(VoiceError::Config(format!(
                    "WebRTC VAD supports 8000/16000/32000/48000 Hz, got {}",
                    other
                )))
            }
        };
        if config.vad_mode > 3 {
            return Err(VoiceError::Config(format!(
                "VAD mode must be 0-3, got {}",
                config.vad_mode
            )));
        }

        // WebRTC VAD takes 10/20/30ms frames; 30ms is used throughout.
        let chunk_size = (config.sample_rate as usize * 30) / 1000;

        let mut vad = Vad::new();
        vad.set_mode(vad_mode_for(config.vad_mode));
        vad.set_sample_rate(sample_rate);

        Ok(Self {
            config,
            vad,
            chunk_size,
            phase: Phase::Idle,
            buffer: Vec::new(),
            speech_start: None,
            last_speech: None,
        })
    }

    /// Expected samples per chunk (30ms at the configured rate).
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// True while a segment is being buffered (speech or gap counting).
    pub fn in_segment(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Consume one chunk; possibly emit a signal.
    pub fn push_chunk(&mut self, samples: &[f32]) -> VoiceResult<Option<EndpointSignal>> {
        if samples.len() != self.chunk_size {
            return Err(VoiceError::Endpoint(format!(
                "expected {} samples per chunk, got {}",
                self.chunk_size,
                samples.len()
            )));
        }

        let pcm: Vec<i16> = samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();
        let voiced = self
            .vad
            .is_voice_segment(&pcm)
            .map_err(|e| VoiceError::Endpoint(format!("VAD rejected frame: {:?}", e)))?;

        let now = Instant::now();

        match (self.phase, voiced) {
            (Phase::Idle, true) => {
                debug!("speech started");
                self.phase = Phase::Speaking;
                self.speech_start = Some(now);
                self.last_speech = Some(now);
                self.buffer.clear();
                self.buffer.extend_from_slice(samples);
                Ok(Some(EndpointSignal::SpeechStarted))
            }
            (Phase::Speaking, true) => {
                self.last_speech = Some(now);
                self.buffer.extend_from_slice(samples);
                if let Some(start) = self.speech_start {
                    if now.duration_since(start) >= self.config.max_turn {
                        debug!("max turn length reached, committing");
                        return Ok(self.commit(now));
                    }
                }
                Ok(None)
            }
            (Phase::Speaking, false) => {
                self.phase = Phase::Gap;
                Ok(None)
            }
            (Phase::Gap, true) => {
                self.phase = Phase::Speaking;
                self.last_speech = Some(now);
                self.buffer.extend_from_slice(samples);
                Ok(None)
            }
            (Phase::Gap, false) => {
                if let Some(last) = self.last_speech {
                    if now.duration_since(last) >= self.config.gap {
                        debug!("gap threshold reached, committing");
                        return Ok(self.commit(now));
                    }
                }
                Ok(None)
            }
            (Phase::Idle, false) => Ok(None),
        }
    }

    fn commit(&mut self, now: Instant) -> Option<EndpointSignal> {
        let duration = self
            .speech_start
            .map(|start| now.duration_since(start))
            .unwrap_or_default();
        let samples = std::mem::take(&mut self.buffer);
        self.reset();

        if duration < self.config.min_speech {
            debug!("segment too short ({:?}), dropping", duration);
            return None;
        }
        Some(EndpointSignal::Committed { samples, duration })
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.speech_start = None;
        self.last_speech = None;
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_sample_rate() {
        let config = EndpointConfig {
            sample_rate: 44100,
            ..Default::default()
        };
        assert!(SpeechEndpointer::new(config).is_err());
    }

    #[test]
    fn rejects_bad_vad_mode() {
        let config = EndpointConfig {
            vad_mode: 7,
            ..Default::default()
        };
        assert!(SpeechEndpointer::new(config).is_err());
    }

    #[test]
    fn rejects_wrong_chunk_length() {
        let mut ep = SpeechEndpointer::new(EndpointConfig::default()).unwrap();
        assert!(ep.push_chunk(&vec![0.0; 100]).is_err());
    }

    #[test]
    fn silence_stays_idle() {
        let mut ep = SpeechEndpointer::new(EndpointConfig::default()).unwrap();
        let silence = vec![0.0f32; ep.chunk_size()];
        for _ in 0..50 {
            let signal = ep.push_chunk(&silence).unwrap();
            assert!(signal.is_none());
        }
        assert!(!ep.in_segment());
    }
}
