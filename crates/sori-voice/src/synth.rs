//! **Text-to-Speech** — synthesis backends and sequential-unit playback.
//!
//! `TtsBackend` turns one sentence unit into audio bytes; `SpeechSynthesizer`
//! is the playback-facing contract the turn controller drives: speak one unit
//! (blocking until it finishes or is cancelled), cancel everything, query
//! liveness. `TtsSpeaker` combines a backend with a rodio sink whose output
//! stream lives on a dedicated thread (`OutputStream` is not `Send`);
//! `cancel_all()` stops the sink, which also unblocks an in-flight unit.

use crate::error::{VoiceError, VoiceResult};
use rodio::{OutputStream, Sink, Source};
use std::io::Cursor;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

/// Fixed voice parameters applied to every unit.
#[derive(Debug, Clone)]
pub struct SpeechStyle {
    /// BCP-47 tag, e.g. "ko-KR".
    pub language: String,
    /// Pitch multiplier (1.0 = neutral). Not every backend honors it.
    pub pitch: f32,
    /// Speaking rate multiplier.
    pub rate: f32,
    /// Playback volume (0.0..1.0).
    pub volume: f32,
}

impl Default for SpeechStyle {
    fn default() -> Self {
        Self {
            language: "ko-KR".to_string(),
            pitch: 1.0,
            rate: 1.2,
            volume: 1.0,
        }
    }
}

/// Backend that renders one text unit to audio bytes (WAV/MP3). Return an
/// empty vec to skip playback for the unit.
pub trait TtsBackend: Send + Sync {
    fn synthesize(&self, text: &str, style: &SpeechStyle) -> VoiceResult<Vec<u8>>;
}

/// Placeholder TTS: renders nothing, so nothing plays.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

impl TtsBackend for PlaceholderTts {
    fn synthesize(&self, _text: &str, _style: &SpeechStyle) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Production TTS: OpenAI-compatible speech API. The style's rate maps to
/// the API's `speed`; pitch has no API equivalent and is ignored here.
/// Environment: `SORI_TTS_API_URL` (default https://api.openai.com/v1),
/// `SORI_TTS_API_KEY`, `SORI_TTS_MODEL` (default tts-1), `SORI_TTS_VOICE`
/// (default shimmer).
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    /// Base URL without trailing slash.
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// TTS model: tts-1 (fast) or tts-1-hd.
    pub model: String,
    /// Voice id (alloy, echo, nova, shimmer, ...).
    pub voice: String,
    client: reqwest::blocking::Client,
}

impl OpenAiTts {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            client,
        })
    }

    /// Build from environment; fails without `SORI_TTS_API_KEY`.
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("SORI_TTS_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("SORI_TTS_API_KEY")
            .map_err(|_| VoiceError::Config("SORI_TTS_API_KEY not set".to_string()))?;
        let model = std::env::var("SORI_TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        let voice = std::env::var("SORI_TTS_VOICE").unwrap_or_else(|_| "shimmer".to_string());
        Self::new(base_url, api_key, model, voice)
    }
}

impl TtsBackend for OpenAiTts {
    fn synthesize(&self, text: &str, style: &SpeechStyle) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "speed": style.rate,
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Playback-facing synthesis contract. `speak_unit` blocks until the unit
/// finishes playing, errors, or `cancel_all` is called from another thread.
pub trait SpeechSynthesizer: Send + Sync {
    fn speak_unit(&self, text: &str, style: &SpeechStyle) -> VoiceResult<()>;
    /// Stop playback immediately and clear anything queued.
    fn cancel_all(&self);
    /// Whether audio is currently playing or queued.
    fn is_speaking(&self) -> bool;
}

/// No-op synthesizer for environments without an output device.
#[derive(Debug, Default)]
pub struct SilentSynthesizer;

impl SpeechSynthesizer for SilentSynthesizer {
    fn speak_unit(&self, _text: &str, _style: &SpeechStyle) -> VoiceResult<()> {
        Ok(())
    }

    fn cancel_all(&self) {}

    fn is_speaking(&self) -> bool {
        false
    }
}

/// TTS backend + rodio sink. The `OutputStream` is parked on its own thread
/// for the speaker's lifetime; the `Sink` itself is shareable, so units can
/// be appended and cancelled from any thread.
pub struct TtsSpeaker {
    tts: Arc<dyn TtsBackend>,
    sink: Arc<Sink>,
    // Dropping this sender releases the thread holding the output stream.
    _hold: mpsc::Sender<()>,
}

impl TtsSpeaker {
    pub fn new(tts: Arc<dyn TtsBackend>) -> VoiceResult<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<Arc<Sink>, String>>();
        let (hold_tx, hold_rx) = mpsc::channel::<()>();

        thread::Builder::new()
            .name("tts-playback".to_string())
            .spawn(move || {
                let built = OutputStream::try_default()
                    .map_err(|e| e.to_string())
                    .and_then(|(stream, handle)| {
                        Sink::try_new(&handle)
                            .map(|sink| (stream, Arc::new(sink)))
                            .map_err(|e| e.to_string())
                    });
                match built {
                    Ok((_stream, sink)) => {
                        let _ = ready_tx.send(Ok(sink));
                        // Keep the output stream alive until the speaker drops.
                        let _ = hold_rx.recv();
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| VoiceError::Playback(e.to_string()))?;

        let sink = ready_rx
            .recv()
            .map_err(|_| VoiceError::Playback("playback thread died".to_string()))?
            .map_err(VoiceError::Playback)?;

        info!("TTS playback sink ready");
        Ok(Self {
            tts,
            sink,
            _hold: hold_tx,
        })
    }
}

impl SpeechSynthesizer for TtsSpeaker {
    fn speak_unit(&self, text: &str, style: &SpeechStyle) -> VoiceResult<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let bytes = self.tts.synthesize(text, style)?;
        if bytes.is_empty() {
            return Ok(());
        }
        let source = rodio::Decoder::new(Cursor::new(bytes))
            .map_err(|e| VoiceError::Playback(format!("decode failed: {}", e)))?;
        self.sink.set_volume(style.volume);
        self.sink.append(source.convert_samples::<f32>());
        // Returns early if cancel_all() stops the sink.
        self.sink.sleep_until_end();
        Ok(())
    }

    fn cancel_all(&self) {
        self.sink.stop();
    }

    fn is_speaking(&self) -> bool {
        !self.sink.empty()
    }
}

/// Pick the best available TTS backend: `OpenAiTts` when an API key is set,
/// else the placeholder.
pub fn create_best_tts() -> Arc<dyn TtsBackend> {
    match OpenAiTts::from_env() {
        Ok(tts) => Arc::new(tts),
        Err(_) => Arc::new(PlaceholderTts),
    }
}
