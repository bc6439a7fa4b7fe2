//! **Turn controller** — the one place that decides who is speaking.
//!
//! Owns the whole session state (listening flag, AI-speaking token,
//! transcript buffer, silence deadline, channel liveness) and runs as a
//! single task over one `select!` loop, so no handler ever races another.
//! Finalized utterances are batched behind a silence window; the window
//! elapsing is the only path that sends anything to the backend. Any user
//! utterance while a response is playing cancels playback before the
//! fragment is processed.

use crate::channel::{ChannelEvent, ChannelHandle};
use crate::listen::{RecognizerEvent, SpeechRecognizer};
use crate::speech::{ensure_sentence_end, split_speech_units};
use crate::synth::{SpeechStyle, SpeechSynthesizer};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Status-line strings surfaced to the UI.
pub mod status {
    pub const LISTENING: &str = "듣는 중...";
    pub const READY: &str = "준비됨";
    pub const RESPONDING: &str = "AI가 응답하는 중...";
    pub const PLAYING: &str = "AI 응답 재생 중...";
    pub const INTERRUPTED: &str = "새로운 입력 감지됨...";
    pub const PLAYBACK_ERROR: &str = "음성 재생 에러";
    pub const SEND_FAILED: &str = "전송 에러 발생";

    /// "에러 발생: {detail}"
    pub fn error(detail: &str) -> String {
        format!("에러 발생: {}", detail)
    }
}

/// Control commands from the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Shutdown,
}

/// Who said a chat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

/// One append-only chat line.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for ChatEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let who = match self.speaker {
            Speaker::User => "나",
            Speaker::Assistant => "AI",
        };
        write!(
            f,
            "[{}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            who,
            self.text
        )
    }
}

/// Events for the UI surface: a status line and an append-only chat list.
#[derive(Debug, Clone)]
pub enum UiEvent {
    Status(String),
    Chat(ChatEntry),
}

/// Turn-taking configuration.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Silence after the last final fragment before the buffer is sent
    /// (default 2000ms).
    pub silence_window: Duration,
    /// Voice parameters for response playback.
    pub style: SpeechStyle,
    /// Pause before re-arming a recognizer that stopped itself
    /// (default 200ms).
    pub rearm_delay: Duration,
    /// Consecutive re-arms (without an utterance in between) before
    /// listening is abandoned with an error status. 0 = unbounded.
    pub max_rearm_attempts: u32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            silence_window: Duration::from_millis(2000),
            style: SpeechStyle::default(),
            rearm_delay: Duration::from_millis(200),
            max_rearm_attempts: 0,
        }
    }
}

/// Handle on the playback task currently speaking a response. The token is
/// the interrupt flag: flipping it false stops the task between units.
struct PlaybackTask {
    active: Arc<AtomicBool>,
}

#[derive(Debug)]
struct PlaybackReport {
    /// True when every unit played; false on interruption or error.
    completed: bool,
}

/// The turn controller. Handlers are methods; `run()` drives them from one
/// event loop.
pub struct TurnController {
    config: TurnConfig,

    // Session state
    listening: bool,
    transcript_buffer: String,
    silence_deadline: Option<Instant>,
    channel_connected: bool,
    playback: Option<PlaybackTask>,
    rearm_at: Option<Instant>,
    rearm_attempts: u32,

    // Capabilities
    recognizer: Arc<dyn SpeechRecognizer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    channel: ChannelHandle,

    // Wiring
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    recognizer_rx: mpsc::UnboundedReceiver<RecognizerEvent>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    playback_tx: mpsc::UnboundedSender<PlaybackReport>,
    playback_rx: mpsc::UnboundedReceiver<PlaybackReport>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
}

impl TurnController {
    /// Wire up a controller. Recognizer and channel events arrive on the
    /// receivers matching the senders those components were built with.
    pub fn new(
        config: TurnConfig,
        recognizer: Arc<dyn SpeechRecognizer>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        channel: ChannelHandle,
        recognizer_rx: mpsc::UnboundedReceiver<RecognizerEvent>,
        channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> (
        Self,
        mpsc::UnboundedSender<Command>,
        mpsc::UnboundedReceiver<UiEvent>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();

        let controller = Self {
            config,
            listening: false,
            transcript_buffer: String::new(),
            silence_deadline: None,
            channel_connected: false,
            playback: None,
            rearm_at: None,
            rearm_attempts: 0,
            recognizer,
            synthesizer,
            channel,
            cmd_rx,
            recognizer_rx,
            channel_rx,
            playback_tx,
            playback_rx,
            ui_tx,
        };
        (controller, cmd_tx, ui_rx)
    }

    /// Drive the controller until `Command::Shutdown` (or the command side
    /// is dropped).
    pub async fn run(mut self) {
        info!("turn controller running");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Start) => self.start(),
                    Some(Command::Stop) => self.stop(),
                    Some(Command::Shutdown) | None => break,
                },
                Some(event) = self.recognizer_rx.recv() => self.on_recognizer_event(event),
                Some(event) = self.channel_rx.recv() => self.on_channel_event(event),
                Some(report) = self.playback_rx.recv() => self.on_playback_report(report),
                _ = tokio::time::sleep_until(self.silence_deadline.unwrap_or_else(Instant::now)),
                    if self.silence_deadline.is_some() =>
                {
                    self.on_silence_elapsed();
                }
                _ = tokio::time::sleep_until(self.rearm_at.unwrap_or_else(Instant::now)),
                    if self.rearm_at.is_some() =>
                {
                    self.on_rearm_due();
                }
            }
        }
        self.recognizer.disarm();
        self.cancel_playback();
        info!("turn controller stopped");
    }

    // --- session queries -------------------------------------------------

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_ai_speaking(&self) -> bool {
        self.playback
            .as_ref()
            .map(|p| p.active.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn buffered_transcript(&self) -> &str {
        &self.transcript_buffer
    }

    // --- trigger controls ------------------------------------------------

    fn start(&mut self) {
        if self.listening {
            return;
        }
        self.transcript_buffer.clear();
        self.silence_deadline = None;
        self.rearm_at = None;
        self.rearm_attempts = 0;
        self.cancel_playback();
        if let Err(e) = self.recognizer.arm() {
            // Capability availability was reported once at startup; a
            // failing arm stays silent here.
            debug!("arm failed: {}", e);
        }
        self.listening = true;
        self.set_status(status::LISTENING);
    }

    fn stop(&mut self) {
        if !self.listening {
            return;
        }
        self.recognizer.disarm();
        self.listening = false;
        self.silence_deadline = None;
        self.rearm_at = None;
        self.set_status(status::READY);
    }

    // --- recognition -----------------------------------------------------

    fn on_recognizer_event(&mut self, event: RecognizerEvent) {
        match event {
            RecognizerEvent::Utterance { text, is_final } => self.on_utterance(&text, is_final),
            RecognizerEvent::Ended => self.on_recognition_ended(),
            RecognizerEvent::Error(err) => self.on_recognition_error(&err),
        }
    }

    fn on_utterance(&mut self, text: &str, is_final: bool) {
        self.rearm_attempts = 0;

        // The user speaking over the AI wins the turn immediately.
        if self.is_ai_speaking() {
            info!("user speech while AI speaking, cancelling playback");
            self.cancel_playback();
            self.set_status(status::INTERRUPTED);
        }

        if is_final {
            self.transcript_buffer.push(' ');
            self.transcript_buffer.push_str(text);
            self.silence_deadline = Some(Instant::now() + self.config.silence_window);
        } else {
            self.set_status(&format!("듣는 중: {} {}", self.transcript_buffer, text));
        }
    }

    /// The silence window elapsing is the only send path.
    fn on_silence_elapsed(&mut self) {
        self.silence_deadline = None;
        if self.transcript_buffer.trim().is_empty() || !self.channel_connected {
            // Nothing to say, or nowhere to say it; the buffer stays.
            return;
        }
        let text = self.transcript_buffer.trim().to_string();
        info!(%text, "silence window elapsed, sending utterance");
        self.push_chat(Speaker::User, text.clone());
        self.set_status(status::RESPONDING);
        if !self.channel.send(text) {
            self.set_status(status::SEND_FAILED);
        }
        // Cleared whether or not the transport later reports a failure.
        self.transcript_buffer.clear();
    }

    fn on_recognition_ended(&mut self) {
        if !self.listening {
            return;
        }
        if self.config.max_rearm_attempts > 0 && self.rearm_attempts >= self.config.max_rearm_attempts
        {
            warn!(
                attempts = self.rearm_attempts,
                "recognizer kept stopping, abandoning listening"
            );
            self.listening = false;
            self.set_status(&status::error("음성 인식을 다시 시작할 수 없습니다"));
            return;
        }
        self.rearm_attempts += 1;
        self.rearm_at = Some(Instant::now() + self.config.rearm_delay);
    }

    fn on_rearm_due(&mut self) {
        self.rearm_at = None;
        if !self.listening {
            return;
        }
        debug!(attempt = self.rearm_attempts, "re-arming recognizer");
        if let Err(e) = self.recognizer.arm() {
            debug!("re-arm failed: {}", e);
        }
    }

    fn on_recognition_error(&mut self, err: &str) {
        warn!("recognition error: {}", err);
        self.recognizer.disarm();
        self.listening = false;
        // The buffer is left intact for inspection; a pending silence
        // deadline may still flush it.
        self.set_status(&status::error(err));
    }

    // --- channel ---------------------------------------------------------

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                info!("chat channel up");
                self.channel_connected = true;
            }
            ChannelEvent::Disconnected => {
                info!("chat channel down");
                self.channel_connected = false;
            }
            ChannelEvent::Response(text) => {
                self.push_chat(Speaker::Assistant, text.clone());
                self.speak(text);
            }
            ChannelEvent::ServerError(err) => {
                warn!("server error: {}", err);
                self.set_status(&status::error(&err));
            }
            ChannelEvent::SendFailed(err) => {
                warn!("outbound send failed: {}", err);
                self.set_status(status::SEND_FAILED);
            }
        }
    }

    // --- synthesis -------------------------------------------------------

    /// Speak a response sentence-by-sentence. Cancels whatever was playing,
    /// then walks the units on a helper task, checking the interrupt token
    /// between units.
    fn speak(&mut self, text: String) {
        self.cancel_playback();
        let units = split_speech_units(&text);
        if units.is_empty() {
            return;
        }

        let active = Arc::new(AtomicBool::new(true));
        self.playback = Some(PlaybackTask {
            active: Arc::clone(&active),
        });

        let synthesizer = Arc::clone(&self.synthesizer);
        let style = self.config.style.clone();
        let ui_tx = self.ui_tx.clone();
        let report_tx = self.playback_tx.clone();
        tokio::spawn(async move {
            let report = play_units(units, synthesizer, style, active, ui_tx).await;
            let _ = report_tx.send(report);
        });
    }

    fn on_playback_report(&mut self, report: PlaybackReport) {
        if report.completed {
            self.playback = None;
            self.set_status(status::LISTENING);
        } else if let Some(task) = &self.playback {
            // Drop the handle only if it belongs to the finished task; a
            // replacement playback keeps its live token.
            if !task.active.load(Ordering::Acquire) {
                self.playback = None;
            }
        }
    }

    fn cancel_playback(&mut self) {
        if let Some(task) = self.playback.take() {
            task.active.store(false, Ordering::Release);
        }
        self.synthesizer.cancel_all();
    }

    // --- UI --------------------------------------------------------------

    fn set_status(&self, text: &str) {
        debug!(status = text, "status");
        let _ = self.ui_tx.send(UiEvent::Status(text.to_string()));
    }

    fn push_chat(&self, speaker: Speaker, text: String) {
        let _ = self.ui_tx.send(UiEvent::Chat(ChatEntry {
            speaker,
            text,
            timestamp: Utc::now(),
        }));
    }
}

/// Sequential unit playback. Each unit is synthesized and played on the
/// blocking pool; the token going false (interruption or a new response)
/// stops the walk without advancing.
async fn play_units(
    units: Vec<String>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    style: SpeechStyle,
    active: Arc<AtomicBool>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
) -> PlaybackReport {
    let _ = ui_tx.send(UiEvent::Status(status::PLAYING.to_string()));

    for unit in units {
        if !active.load(Ordering::Acquire) {
            return PlaybackReport { completed: false };
        }
        let spoken = ensure_sentence_end(unit);
        let synth = Arc::clone(&synthesizer);
        let unit_style = style.clone();
        let result =
            tokio::task::spawn_blocking(move || synth.speak_unit(&spoken, &unit_style)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("unit playback failed: {}", e);
                let _ = ui_tx.send(UiEvent::Status(status::PLAYBACK_ERROR.to_string()));
                active.store(false, Ordering::Release);
                return PlaybackReport { completed: false };
            }
            Err(e) => {
                warn!("playback task failed: {}", e);
                active.store(false, Ordering::Release);
                return PlaybackReport { completed: false };
            }
        }
    }

    // Normal finish unless an interruption raced the last unit.
    let completed = active.swap(false, Ordering::AcqRel);
    PlaybackReport { completed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceResult;

    struct NullRecognizer;

    impl SpeechRecognizer for NullRecognizer {
        fn arm(&self) -> VoiceResult<()> {
            Ok(())
        }
        fn disarm(&self) {}
    }

    struct NullSynthesizer;

    impl SpeechSynthesizer for NullSynthesizer {
        fn speak_unit(&self, _text: &str, _style: &SpeechStyle) -> VoiceResult<()> {
            Ok(())
        }
        fn cancel_all(&self) {}
        fn is_speaking(&self) -> bool {
            false
        }
    }

    fn controller() -> (
        TurnController,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedReceiver<UiEvent>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (_recog_tx, recog_rx) = mpsc::unbounded_channel::<RecognizerEvent>();
        let (_chan_tx, chan_rx) = mpsc::unbounded_channel::<ChannelEvent>();
        let (controller, _cmd_tx, ui_rx) = TurnController::new(
            TurnConfig::default(),
            Arc::new(NullRecognizer),
            Arc::new(NullSynthesizer),
            ChannelHandle::new(outbound_tx),
            recog_rx,
            chan_rx,
        );
        (controller, outbound_rx, ui_rx)
    }

    #[tokio::test]
    async fn final_fragment_buffers_and_arms_deadline() {
        let (mut c, _out, _ui) = controller();
        c.on_utterance("불 켜줘", true);
        assert_eq!(c.buffered_transcript(), " 불 켜줘");
        assert!(c.silence_deadline.is_some());

        // A second final replaces the deadline rather than stacking one.
        let first = c.silence_deadline;
        c.on_utterance("지금", true);
        assert_eq!(c.buffered_transcript(), " 불 켜줘 지금");
        assert!(c.silence_deadline >= first);
    }

    #[tokio::test]
    async fn interim_fragment_leaves_buffer_untouched() {
        let (mut c, _out, mut ui) = controller();
        c.on_utterance("불", false);
        assert_eq!(c.buffered_transcript(), "");
        assert!(c.silence_deadline.is_none());
        match ui.try_recv().unwrap() {
            UiEvent::Status(s) => assert!(s.starts_with("듣는 중:")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn disconnected_fire_keeps_buffer() {
        let (mut c, mut out, _ui) = controller();
        c.on_utterance("불 켜줘", true);
        c.on_silence_elapsed();
        assert!(out.try_recv().is_err());
        assert_eq!(c.buffered_transcript(), " 불 켜줘");
    }

    #[tokio::test]
    async fn connected_fire_sends_trimmed_and_clears() {
        let (mut c, mut out, _ui) = controller();
        c.on_channel_event(ChannelEvent::Connected);
        c.on_utterance("turn on", true);
        c.on_utterance("the lights", true);
        c.on_silence_elapsed();
        assert_eq!(out.try_recv().unwrap(), "turn on the lights");
        assert_eq!(c.buffered_transcript(), "");
        // One window, one send.
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn server_error_touches_status_only() {
        let (mut c, _out, mut ui) = controller();
        c.on_utterance("메모", true);
        c.on_channel_event(ChannelEvent::ServerError("boom".to_string()));
        assert_eq!(c.buffered_transcript(), " 메모");
        let mut saw_chat = false;
        let mut saw_error = false;
        while let Ok(event) = ui.try_recv() {
            match event {
                UiEvent::Chat(_) => saw_chat = true,
                UiEvent::Status(s) => saw_error |= s == status::error("boom"),
            }
        }
        assert!(!saw_chat);
        assert!(saw_error);
    }
}
