//! # sori-voice — voice chat turn-taking client
//!
//! Connects a microphone speech-recognition pipeline, a text-to-speech
//! player, and one WebSocket chat channel, enforcing that only one party —
//! the user or the AI — is speaking at a time. Finalized utterances are
//! batched behind a silence window and sent as a single message; the reply
//! is spoken sentence-by-sentence and is cancelled the moment the user
//! speaks again.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       Turn Controller                         │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │  │ Recognizer  │ → │  transcript  │ → │   chat channel   │   │
//! │  │ (mic→VAD→   │   │  buffer +    │   │  (WebSocket,     │   │
//! │  │  STT)       │   │  2s silence  │   │   5s reconnect)  │   │
//! │  └─────────────┘   └──────────────┘   └──────────────────┘   │
//! │        │                                       │             │
//! │        │ utterance while playing               ▼             │
//! │        │ = interruption              ┌──────────────────┐    │
//! │        └────────────────────────────│  TTS playback    │    │
//! │                 kill signal         │  (unit by unit)  │    │
//! │                                     └──────────────────┘    │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod channel;
pub mod config;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod listen;
pub mod speech;
pub mod stt;
pub mod synth;

pub use audio::{AudioCapture, AudioChunk, AudioConfig};
pub use channel::{spawn_channel, ChannelConfig, ChannelEvent, ChannelHandle, ServerMessage};
pub use config::AppConfig;
pub use controller::{
    status, ChatEntry, Command, Speaker, TurnConfig, TurnController, UiEvent,
};
pub use endpoint::{EndpointConfig, EndpointSignal, SpeechEndpointer};
pub use error::{VoiceError, VoiceResult};
pub use listen::{ListenConfig, MicRecognizer, RecognizerEvent, SpeechRecognizer};
pub use speech::{ensure_sentence_end, split_speech_units};
pub use stt::{create_best_stt, OpenAiStt, PlaceholderStt, SpeechSegment, SttBackend};
pub use synth::{
    create_best_tts, OpenAiTts, PlaceholderTts, SilentSynthesizer, SpeechStyle,
    SpeechSynthesizer, TtsBackend, TtsSpeaker,
};
