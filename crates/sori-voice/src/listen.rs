//! **Speech recognition** — the capability contract and the microphone
//! implementation.
//!
//! A recognizer is armed and disarmed by the turn controller and reports
//! everything else through events: partial or final utterances, an `Ended`
//! event when the capability stops itself (no speech for a while), and
//! terminal errors. The controller re-arms on `Ended` while listening, which
//! is what makes "continuous" listening continuous.
//!
//! `MicRecognizer` runs the whole pipeline on one capture thread (cpal
//! streams and the VAD are not `Send`): microphone → 30ms chunks →
//! endpointer → STT backend → final utterances.

use crate::audio::{AudioCapture, AudioConfig};
use crate::endpoint::{EndpointConfig, EndpointSignal, SpeechEndpointer};
use crate::error::{VoiceError, VoiceResult};
use crate::stt::{SpeechSegment, SttBackend};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Events a recognizer reports to its subscriber.
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    /// One recognized fragment, partial or final.
    Utterance { text: String, is_final: bool },
    /// The capability stopped itself (no speech for its own interval).
    Ended,
    /// Terminal runtime failure; the recognizer is no longer armed.
    Error(String),
}

/// Recognition capability contract: arm/disarm, events via the subscriber
/// sender handed to the implementation at construction.
pub trait SpeechRecognizer: Send + Sync {
    /// Begin a capture session. Arming while armed is a no-op.
    fn arm(&self) -> VoiceResult<()>;
    /// Stop capturing. No further events are emitted for this session.
    fn disarm(&self);
}

/// Recognition configuration, mirroring the capability contract.
#[derive(Debug, Clone)]
pub struct ListenConfig {
    /// Keep recognizing across utterances (the mic pipeline always does).
    pub continuous: bool,
    /// Whether partial fragments are wanted. The mic pipeline produces
    /// finals only; streaming implementations may honor this.
    pub interim_results: bool,
    /// Recognition language tag (default "ko-KR").
    pub language: String,
    /// Capture sample rate (default 16000).
    pub sample_rate: u32,
    /// VAD aggressiveness 0-3 (default 2).
    pub vad_mode: u8,
    /// Post-speech silence before a segment commits (default 800ms).
    pub gap_ms: u64,
    /// Minimum speech duration per segment (default 200ms).
    pub min_speech_ms: u64,
    /// Auto-commit bound per segment (default 30s).
    pub max_turn_secs: u64,
    /// Idle time after which the capability stops itself and emits `Ended`
    /// (default 8s).
    pub no_speech_timeout_secs: u64,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            continuous: true,
            interim_results: true,
            language: "ko-KR".to_string(),
            sample_rate: 16000,
            vad_mode: 2,
            gap_ms: 800,
            min_speech_ms: 200,
            max_turn_secs: 30,
            no_speech_timeout_secs: 8,
        }
    }
}

/// Microphone-backed recognizer: cpal capture, VAD endpointing, pluggable
/// STT. Construction probes for an input device so a missing capability is
/// reported once at startup rather than on every arm.
pub struct MicRecognizer {
    config: ListenConfig,
    stt: Arc<dyn SttBackend>,
    events: UnboundedSender<RecognizerEvent>,
    armed: Arc<AtomicBool>,
}

impl MicRecognizer {
    pub fn new(
        config: ListenConfig,
        stt: Arc<dyn SttBackend>,
        events: UnboundedSender<RecognizerEvent>,
    ) -> VoiceResult<Self> {
        AudioCapture::probe()?;
        Ok(Self {
            config,
            stt,
            events,
            armed: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl SpeechRecognizer for MicRecognizer {
    fn arm(&self) -> VoiceResult<()> {
        if self.armed.swap(true, Ordering::SeqCst) {
            debug!("recognizer already armed");
            return Ok(());
        }
        let config = self.config.clone();
        let stt = Arc::clone(&self.stt);
        let events = self.events.clone();
        let armed = Arc::clone(&self.armed);

        thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || capture_session(config, stt, events, armed))
            .map_err(|e| VoiceError::AudioStream(e.to_string()))?;
        Ok(())
    }

    fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

/// One armed session: runs until disarmed, errored, or self-terminated by
/// the no-speech timeout. Clears `armed` on every exit path so the next
/// `arm()` starts a fresh session.
fn capture_session(
    config: ListenConfig,
    stt: Arc<dyn SttBackend>,
    events: UnboundedSender<RecognizerEvent>,
    armed: Arc<AtomicBool>,
) {
    let fail = |armed: &AtomicBool, events: &UnboundedSender<RecognizerEvent>, err: VoiceError| {
        armed.store(false, Ordering::SeqCst);
        let _ = events.send(RecognizerEvent::Error(err.to_string()));
    };

    let audio_config = AudioConfig {
        sample_rate: config.sample_rate,
        channels: 1,
        chunk_size: (config.sample_rate as usize * 30) / 1000,
    };
    let capture = match AudioCapture::open(audio_config) {
        Ok(c) => c,
        Err(e) => return fail(&armed, &events, e),
    };

    let (chunk_tx, chunk_rx) = std::sync::mpsc::channel();
    let _stream = match capture.stream_into(chunk_tx) {
        Ok(s) => s,
        Err(e) => return fail(&armed, &events, e),
    };

    let mut endpointer = match SpeechEndpointer::new(EndpointConfig {
        sample_rate: config.sample_rate,
        vad_mode: config.vad_mode,
        gap: Duration::from_millis(config.gap_ms),
        min_speech: Duration::from_millis(config.min_speech_ms),
        max_turn: Duration::from_secs(config.max_turn_secs),
    }) {
        Ok(ep) => ep,
        Err(e) => return fail(&armed, &events, e),
    };

    let no_speech_timeout = Duration::from_secs(config.no_speech_timeout_secs);
    let mut last_activity = Instant::now();

    info!(
        language = %config.language,
        gap_ms = config.gap_ms,
        "recognizer armed"
    );

    loop {
        if !armed.load(Ordering::SeqCst) {
            debug!("recognizer disarmed, releasing device");
            return;
        }

        let chunk = match chunk_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => {
                if !endpointer.in_segment() && last_activity.elapsed() >= no_speech_timeout {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                return fail(
                    &armed,
                    &events,
                    VoiceError::AudioStream("capture stream closed".to_string()),
                );
            }
        };

        if chunk.samples.len() != endpointer.chunk_size() {
            continue;
        }

        match endpointer.push_chunk(&chunk.samples) {
            Ok(Some(EndpointSignal::SpeechStarted)) => {
                last_activity = Instant::now();
            }
            Ok(Some(EndpointSignal::Committed { samples, duration })) => {
                last_activity = Instant::now();
                let segment = SpeechSegment {
                    samples,
                    sample_rate: config.sample_rate,
                    duration,
                };
                match stt.transcribe(&segment) {
                    Ok(text) if !text.trim().is_empty() => {
                        info!(%text, "utterance recognized");
                        if events
                            .send(RecognizerEvent::Utterance {
                                text,
                                is_final: true,
                            })
                            .is_err()
                        {
                            armed.store(false, Ordering::SeqCst);
                            return;
                        }
                        if !config.continuous {
                            break;
                        }
                    }
                    Ok(_) => debug!("segment transcribed to nothing, dropped"),
                    // A failed transcription loses one segment but does not
                    // take the capability down.
                    Err(e) => warn!("transcription failed: {}", e),
                }
            }
            Ok(None) => {
                if endpointer.in_segment() {
                    last_activity = Instant::now();
                }
            }
            Err(e) => return fail(&armed, &events, e),
        }

        if !endpointer.in_segment() && last_activity.elapsed() >= no_speech_timeout {
            break;
        }
    }

    // Session over (no-speech timeout, or single-shot mode got its
    // utterance): release the device and let the controller decide whether
    // to re-arm.
    info!("recognition session ended, releasing device");
    armed.store(false, Ordering::SeqCst);
    let _ = events.send(RecognizerEvent::Ended);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_config_defaults() {
        let c = ListenConfig::default();
        assert!(c.continuous);
        assert!(c.interim_results);
        assert_eq!(c.language, "ko-KR");
        assert_eq!(c.sample_rate, 16000);
        assert_eq!(c.gap_ms, 800);
        assert_eq!(c.no_speech_timeout_secs, 8);
    }
}
