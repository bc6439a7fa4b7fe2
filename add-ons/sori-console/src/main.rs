//! sori console — voice chat in a terminal.
//!
//! Wires the microphone recognizer, the TTS speaker, and the backend chat
//! channel to the turn controller, then mirrors the UI surface onto stdout:
//! a status line, an append-only chat printout, and the two trigger
//! controls as `start` / `stop` commands (plus `quit` / Ctrl-C).

use sori_voice::{
    create_best_stt, create_best_tts, spawn_channel, AppConfig, Command, MicRecognizer,
    SilentSynthesizer, SpeechRecognizer, SpeechSynthesizer, TtsSpeaker, TurnController, UiEvent,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env if present (before any env::var calls).
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[sori] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    // Recognition is the one capability the session cannot live without;
    // report its absence once and leave.
    let stt = create_best_stt(&config.listen.language);
    let (recognizer_tx, recognizer_rx) = mpsc::unbounded_channel();
    let recognizer: Arc<dyn SpeechRecognizer> =
        match MicRecognizer::new(config.listen.clone(), stt, recognizer_tx) {
            Ok(r) => Arc::new(r),
            Err(e) => {
                eprintln!("[sori] 이 환경은 음성 인식을 지원하지 않습니다: {}", e);
                return;
            }
        };

    // Missing audio output only mutes the replies.
    let synthesizer: Arc<dyn SpeechSynthesizer> = match TtsSpeaker::new(create_best_tts()) {
        Ok(speaker) => Arc::new(speaker),
        Err(e) => {
            tracing::warn!("audio output unavailable, replies will be silent: {}", e);
            Arc::new(SilentSynthesizer)
        }
    };

    let (channel, channel_rx) = spawn_channel(config.channel.clone());

    let (controller, cmd_tx, mut ui_rx) = TurnController::new(
        config.turn.clone(),
        recognizer,
        synthesizer,
        channel,
        recognizer_rx,
        channel_rx,
    );
    tokio::spawn(controller.run());

    let _ = cmd_tx.send(Command::Start);
    println!("[sori] 명령: start / stop / quit  (Ctrl-C로 종료)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = ui_rx.recv() => match event {
                Some(UiEvent::Status(text)) => println!("[상태] {}", text),
                Some(UiEvent::Chat(entry)) => println!("{}", entry),
                None => break,
            },
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(l)) => l,
                    _ => {
                        let _ = cmd_tx.send(Command::Shutdown);
                        break;
                    }
                };
                match line.trim() {
                    "" => {}
                    "start" => { let _ = cmd_tx.send(Command::Start); }
                    "stop" => { let _ = cmd_tx.send(Command::Stop); }
                    "quit" | "exit" => {
                        let _ = cmd_tx.send(Command::Shutdown);
                        break;
                    }
                    other => println!("[sori] 알 수 없는 명령: {}", other),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received, shutting down");
                let _ = cmd_tx.send(Command::Shutdown);
                break;
            }
        }
    }
}
