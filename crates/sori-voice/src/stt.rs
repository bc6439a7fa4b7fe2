//! **Speech-to-Text** — convert an endpointed PCM segment into text.
//!
//! Implement `SttBackend` for any transcription service; `OpenAiStt` talks
//! to an OpenAI-compatible `audio/transcriptions` endpoint, `PlaceholderStt`
//! keeps demos and tests off the network.

use crate::error::{VoiceError, VoiceResult};
use std::time::Duration;

/// One endpointed speech segment awaiting transcription.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// PCM samples (f32, -1.0..1.0, mono).
    pub samples: Vec<f32>,
    /// Sample rate (e.g. 16000).
    pub sample_rate: u32,
    /// Approximate speech duration.
    pub duration: Duration,
}

/// Backend for converting a `SpeechSegment` into text. Called from the
/// capture thread, so blocking IO is fine.
pub trait SttBackend: Send + Sync {
    /// Transcribe one segment. Return an empty string when nothing was
    /// recognized; the recognizer drops empty transcripts silently.
    fn transcribe(&self, segment: &SpeechSegment) -> VoiceResult<String>;
}

/// Encode f32 PCM (mono) as 16-bit WAV bytes for upload.
fn pcm_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.extend_from_slice(&i.to_le_bytes());
    }
    buf
}

/// Map a BCP-47 tag like "ko-KR" to the primary subtag ("ko") the
/// transcription API expects.
fn primary_subtag(language: &str) -> &str {
    language.split('-').next().unwrap_or(language)
}

/// Placeholder STT: returns a fixed transcript (or nothing). Keeps the
/// pipeline runnable without an API key.
#[derive(Debug, Default)]
pub struct PlaceholderStt {
    /// Returned for every segment; `None` means every segment transcribes
    /// to empty (and is dropped upstream).
    pub transcript: Option<String>,
}

impl PlaceholderStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transcript(s: impl Into<String>) -> Self {
        Self {
            transcript: Some(s.into()),
        }
    }
}

impl SttBackend for PlaceholderStt {
    fn transcribe(&self, _segment: &SpeechSegment) -> VoiceResult<String> {
        Ok(self.transcript.clone().unwrap_or_default())
    }
}

/// Production STT: OpenAI-compatible transcription API.
/// Environment: `SORI_STT_API_URL` (default https://api.openai.com/v1),
/// `SORI_STT_API_KEY`, `SORI_STT_MODEL` (default whisper-1).
#[derive(Debug, Clone)]
pub struct OpenAiStt {
    /// Base URL without trailing slash.
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Model: whisper-1, gpt-4o-transcribe, etc.
    pub model: String,
    /// Recognition language tag, e.g. "ko-KR".
    pub language: String,
    client: reqwest::blocking::Client,
}

impl OpenAiStt {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        language: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            language: language.into(),
            client,
        })
    }

    /// Build from environment; fails without `SORI_STT_API_KEY`.
    pub fn from_env(language: &str) -> VoiceResult<Self> {
        let base_url = std::env::var("SORI_STT_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("SORI_STT_API_KEY")
            .map_err(|_| VoiceError::Config("SORI_STT_API_KEY not set".to_string()))?;
        let model = std::env::var("SORI_STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model, language)
    }
}

impl SttBackend for OpenAiStt {
    fn transcribe(&self, segment: &SpeechSegment) -> VoiceResult<String> {
        if segment.samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_to_wav(&segment.samples, segment.sample_rate);
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("segment.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", primary_subtag(&self.language).to_string());
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().map_err(|e| VoiceError::Stt(e.to_string()))?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        Ok(text)
    }
}

/// Pick the best available STT backend: `OpenAiStt` when an API key is set,
/// else the placeholder.
pub fn create_best_stt(language: &str) -> std::sync::Arc<dyn SttBackend> {
    match OpenAiStt::from_env(language) {
        Ok(stt) => std::sync::Arc::new(stt),
        Err(_) => std::sync::Arc::new(PlaceholderStt::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(samples: Vec<f32>) -> SpeechSegment {
        SpeechSegment {
            samples,
            sample_rate: 16000,
            duration: Duration::from_millis(300),
        }
    }

    #[test]
    fn placeholder_default_is_empty() {
        let stt = PlaceholderStt::new();
        assert_eq!(stt.transcribe(&segment(vec![0.0; 480])).unwrap(), "");
    }

    #[test]
    fn placeholder_fixed_transcript() {
        let stt = PlaceholderStt::with_transcript("불 켜줘");
        assert_eq!(stt.transcribe(&segment(vec![])).unwrap(), "불 켜줘");
    }

    #[test]
    fn wav_header_shape() {
        let wav = pcm_to_wav(&[0.0, 0.5, -0.5], 16000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 3 * 2);
    }

    #[test]
    fn language_subtag() {
        assert_eq!(primary_subtag("ko-KR"), "ko");
        assert_eq!(primary_subtag("en"), "en");
    }
}
