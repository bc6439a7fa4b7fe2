//! Turn-taking behavior tests.
//!
//! The controller is driven through mock capabilities, so none of these
//! tests need audio hardware or a backend. Tests that only involve the
//! silence window run on tokio's paused clock; tests that exercise playback
//! (real blocking-pool threads) run on real time.

use sori_voice::{
    ChannelEvent, ChannelHandle, ChatEntry, Command, RecognizerEvent, Speaker, SpeechRecognizer,
    SpeechStyle, SpeechSynthesizer, TurnConfig, TurnController, UiEvent, VoiceResult, status,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::assert_ok;

#[derive(Default)]
struct MockRecognizer {
    arms: AtomicUsize,
    disarms: AtomicUsize,
}

impl SpeechRecognizer for MockRecognizer {
    fn arm(&self) -> VoiceResult<()> {
        self.arms.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disarm(&self) {
        self.disarms.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records every unit and cancel. With `hold` set, a unit "plays" until the
/// next cancel, like a sink being stopped mid-utterance.
struct MockSynthesizer {
    units: Mutex<Vec<String>>,
    cancels: AtomicUsize,
    hold: bool,
}

impl MockSynthesizer {
    fn instant() -> Self {
        Self {
            units: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
            hold: false,
        }
    }

    fn holding() -> Self {
        Self {
            units: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
            hold: true,
        }
    }

    fn units(&self) -> Vec<String> {
        self.units.lock().unwrap().clone()
    }
}

impl SpeechSynthesizer for MockSynthesizer {
    fn speak_unit(&self, text: &str, _style: &SpeechStyle) -> VoiceResult<()> {
        self.units.lock().unwrap().push(text.to_string());
        let epoch = self.cancels.load(Ordering::SeqCst);
        while self.hold && self.cancels.load(Ordering::SeqCst) == epoch {
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }

    fn cancel_all(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn is_speaking(&self) -> bool {
        false
    }
}

struct Harness {
    cmd_tx: mpsc::UnboundedSender<Command>,
    ui_rx: mpsc::UnboundedReceiver<UiEvent>,
    recognizer_tx: mpsc::UnboundedSender<RecognizerEvent>,
    channel_tx: mpsc::UnboundedSender<ChannelEvent>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    recognizer: Arc<MockRecognizer>,
    synthesizer: Arc<MockSynthesizer>,
}

fn spawn_harness(synthesizer: MockSynthesizer) -> Harness {
    let recognizer = Arc::new(MockRecognizer::default());
    let synthesizer = Arc::new(synthesizer);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (recognizer_tx, recognizer_rx) = mpsc::unbounded_channel();
    let (channel_tx, channel_rx) = mpsc::unbounded_channel();

    let (controller, cmd_tx, ui_rx) = TurnController::new(
        TurnConfig::default(),
        Arc::clone(&recognizer) as Arc<dyn SpeechRecognizer>,
        Arc::clone(&synthesizer) as Arc<dyn SpeechSynthesizer>,
        ChannelHandle::new(outbound_tx),
        recognizer_rx,
        channel_rx,
    );
    tokio::spawn(controller.run());

    Harness {
        cmd_tx,
        ui_rx,
        recognizer_tx,
        channel_tx,
        outbound_rx,
        recognizer,
        synthesizer,
    }
}

fn final_fragment(text: &str) -> RecognizerEvent {
    RecognizerEvent::Utterance {
        text: text.to_string(),
        is_final: true,
    }
}

fn interim_fragment(text: &str) -> RecognizerEvent {
    RecognizerEvent::Utterance {
        text: text.to_string(),
        is_final: false,
    }
}

/// Await a UI event matching the predicate, within (possibly virtual) time.
async fn await_ui<F: Fn(&UiEvent) -> bool>(
    ui_rx: &mut mpsc::UnboundedReceiver<UiEvent>,
    within: Duration,
    pred: F,
) -> Option<UiEvent> {
    timeout(within, async {
        while let Some(event) = ui_rx.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

fn is_user_chat(event: &UiEvent, text: &str) -> bool {
    matches!(event, UiEvent::Chat(ChatEntry { speaker: Speaker::User, text: t, .. }) if t == text)
}

#[tokio::test(start_paused = true)]
async fn silence_window_coalesces_finals_into_one_send() {
    let mut h = spawn_harness(MockSynthesizer::instant());
    h.cmd_tx.send(Command::Start).unwrap();
    h.channel_tx.send(ChannelEvent::Connected).unwrap();

    h.recognizer_tx.send(final_fragment("turn on")).unwrap();
    h.recognizer_tx.send(final_fragment("the lights")).unwrap();

    let sent = timeout(Duration::from_secs(10), h.outbound_rx.recv())
        .await
        .expect("silence window should have elapsed")
        .expect("channel handle dropped");
    assert_eq!(sent, "turn on the lights");

    // The window fired once; nothing else goes out.
    assert!(timeout(Duration::from_secs(10), h.outbound_rx.recv())
        .await
        .is_err());

    // The send showed up as a user chat entry and flipped the status.
    let entry = await_ui(&mut h.ui_rx, Duration::from_secs(1), |e| {
        is_user_chat(e, "turn on the lights")
    })
    .await;
    assert!(entry.is_some(), "expected a user-originated chat entry");
    let responding = await_ui(&mut h.ui_rx, Duration::from_secs(1), |e| {
        matches!(e, UiEvent::Status(s) if s == status::RESPONDING)
    })
    .await;
    assert!(responding.is_some(), "expected 'AI가 응답하는 중...' status");
}

#[tokio::test(start_paused = true)]
async fn interim_fragments_never_send() {
    let mut h = spawn_harness(MockSynthesizer::instant());
    h.cmd_tx.send(Command::Start).unwrap();
    h.channel_tx.send(ChannelEvent::Connected).unwrap();

    h.recognizer_tx.send(interim_fragment("불")).unwrap();
    h.recognizer_tx.send(interim_fragment("불 켜")).unwrap();

    assert!(timeout(Duration::from_secs(30), h.outbound_rx.recv())
        .await
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn disconnected_fire_preserves_buffer_for_next_send() {
    let mut h = spawn_harness(MockSynthesizer::instant());
    h.cmd_tx.send(Command::Start).unwrap();

    // Channel is down: the window fires, nothing is sent, nothing is lost.
    h.recognizer_tx.send(final_fragment("불 켜줘")).unwrap();
    assert!(timeout(Duration::from_secs(10), h.outbound_rx.recv())
        .await
        .is_err());

    // Once connected, the retained fragment rides along with the next one.
    h.channel_tx.send(ChannelEvent::Connected).unwrap();
    h.recognizer_tx.send(final_fragment("지금")).unwrap();
    let sent = timeout(Duration::from_secs(10), h.outbound_rx.recv())
        .await
        .expect("window should fire while connected")
        .expect("channel handle dropped");
    assert_eq!(sent, "불 켜줘 지금");
}

#[tokio::test(start_paused = true)]
async fn ended_rearms_only_while_listening() {
    let mut h = spawn_harness(MockSynthesizer::instant());
    h.cmd_tx.send(Command::Start).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.recognizer.arms.load(Ordering::SeqCst), 1);

    // Capability stopped itself: re-armed after the supervisor delay.
    h.recognizer_tx.send(RecognizerEvent::Ended).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.recognizer.arms.load(Ordering::SeqCst), 2);

    // Stopped by the user: an Ended afterwards stays dead.
    h.cmd_tx.send(Command::Stop).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.recognizer_tx.send(RecognizerEvent::Ended).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.recognizer.arms.load(Ordering::SeqCst), 2);
    assert!(h.recognizer.disarms.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(start_paused = true)]
async fn recognition_error_aborts_listening() {
    let mut h = spawn_harness(MockSynthesizer::instant());
    h.cmd_tx.send(Command::Start).unwrap();
    h.recognizer_tx.send(final_fragment("메모해줘")).unwrap();
    h.recognizer_tx
        .send(RecognizerEvent::Error("mic broke".to_string()))
        .unwrap();

    let errored = await_ui(&mut h.ui_rx, Duration::from_secs(5), |e| {
        matches!(e, UiEvent::Status(s) if s == &status::error("mic broke"))
    })
    .await;
    assert!(errored.is_some(), "expected error status");
    assert!(h.recognizer.disarms.load(Ordering::SeqCst) >= 1);

    // An Ended event after the error must not resurrect listening.
    h.recognizer_tx.send(RecognizerEvent::Ended).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.recognizer.arms.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn response_units_are_synthesized_in_order() {
    let mut h = spawn_harness(MockSynthesizer::instant());
    tokio_test::assert_ok!(h.cmd_tx.send(Command::Start));
    h.channel_tx.send(ChannelEvent::Connected).unwrap();

    h.channel_tx
        .send(ChannelEvent::Response("Hello. How are you?".to_string()))
        .unwrap();

    // Assistant chat entry first...
    let entry = await_ui(&mut h.ui_rx, Duration::from_secs(5), |e| {
        matches!(e, UiEvent::Chat(ChatEntry { speaker: Speaker::Assistant, .. }))
    })
    .await;
    assert!(entry.is_some(), "expected an assistant chat entry");

    // ...then playback runs to completion and hands the turn back.
    let back = await_ui(&mut h.ui_rx, Duration::from_secs(5), |e| {
        matches!(e, UiEvent::Status(s) if s == status::LISTENING)
    })
    .await;
    assert!(back.is_some(), "expected the status to return to listening");

    assert_eq!(h.synthesizer.units(), vec!["Hello.", " How are you?."]);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_response_synthesizes_nothing() {
    let mut h = spawn_harness(MockSynthesizer::instant());
    h.cmd_tx.send(Command::Start).unwrap();
    h.channel_tx
        .send(ChannelEvent::Response("   ".to_string()))
        .unwrap();

    let entry = await_ui(&mut h.ui_rx, Duration::from_secs(5), |e| {
        matches!(e, UiEvent::Chat(ChatEntry { speaker: Speaker::Assistant, .. }))
    })
    .await;
    assert!(entry.is_some(), "blank responses still show in the chat");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.synthesizer.units().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn utterance_during_playback_interrupts() {
    let mut h = spawn_harness(MockSynthesizer::holding());
    h.cmd_tx.send(Command::Start).unwrap();
    h.channel_tx.send(ChannelEvent::Connected).unwrap();

    h.channel_tx
        .send(ChannelEvent::Response(
            "첫 번째 문장입니다. 두 번째 문장입니다.".to_string(),
        ))
        .unwrap();

    // Wait for the first unit to be mid-playback.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while h.synthesizer.units().is_empty() {
        assert!(std::time::Instant::now() < deadline, "playback never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let cancels_before = h.synthesizer.cancels.load(Ordering::SeqCst);

    // Any fragment — even an interim one — takes the turn back.
    h.recognizer_tx.send(interim_fragment("잠깐")).unwrap();

    let interrupted = await_ui(&mut h.ui_rx, Duration::from_secs(5), |e| {
        matches!(e, UiEvent::Status(s) if s == status::INTERRUPTED)
    })
    .await;
    assert!(interrupted.is_some(), "expected interruption status");

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while h.synthesizer.cancels.load(Ordering::SeqCst) <= cancels_before {
        assert!(std::time::Instant::now() < deadline, "synthesis never cancelled");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The walk stopped: the second unit never plays.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.synthesizer.units().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_shows_status_without_chat_entry() {
    let mut h = spawn_harness(MockSynthesizer::instant());
    h.cmd_tx.send(Command::Start).unwrap();
    h.channel_tx
        .send(ChannelEvent::ServerError("boom".to_string()))
        .unwrap();

    let errored = await_ui(&mut h.ui_rx, Duration::from_secs(5), |e| {
        matches!(e, UiEvent::Status(s) if s == &status::error("boom"))
    })
    .await;
    assert!(errored.is_some(), "expected error status");

    // Nothing was spoken and nothing entered the chat log.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.synthesizer.units().is_empty());
    while let Ok(event) = h.ui_rx.try_recv() {
        assert!(
            !matches!(event, UiEvent::Chat(_)),
            "server errors must not create chat entries"
        );
    }
}
