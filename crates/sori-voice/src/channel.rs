//! **Chat channel** — WebSocket connection to the AI backend.
//!
//! One spawned task owns the socket: outbound user utterances go out as
//! plain text frames; inbound frames are one JSON object each, tagged
//! `ai_response` or `error`. A fixed-interval poll (default 5s) reopens the
//! connection whenever it is down — no backoff, no retry cap; the
//! disconnected state simply suppresses sends upstream.

use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, info, warn};

use futures_util::{SinkExt, StreamExt};

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Backend WebSocket endpoint.
    pub url: String,
    /// Pause between reconnect attempts.
    pub reconnect_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".to_string(),
            reconnect_interval: Duration::from_secs(5),
        }
    }
}

/// One inbound frame from the backend.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ServerMessage {
    AiResponse(String),
    Error(String),
}

/// Liveness and traffic events delivered to the turn controller.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    /// `ai_response` content.
    Response(String),
    /// `error` content.
    ServerError(String),
    /// An outbound frame could not be written.
    SendFailed(String),
}

/// Outbound half handed to the controller; sends are fire-and-forget, the
/// channel task reports failures as events.
#[derive(Clone)]
pub struct ChannelHandle {
    outbound: mpsc::UnboundedSender<String>,
}

impl ChannelHandle {
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self { outbound }
    }

    /// Queue one text frame. Returns false when the channel task is gone.
    pub fn send(&self, text: String) -> bool {
        self.outbound.send(text).is_ok()
    }
}

/// Spawn the channel task. Returns the outbound handle and the event stream.
pub fn spawn_channel(
    config: ChannelConfig,
) -> (ChannelHandle, mpsc::UnboundedReceiver<ChannelEvent>) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_channel(config, outbound_rx, event_tx));
    (ChannelHandle::new(outbound_tx), event_rx)
}

async fn run_channel(
    config: ChannelConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
) {
    loop {
        // Controller gone: no reason to keep the poll alive.
        if outbound_rx.is_closed() {
            return;
        }

        let ws_stream = match connect_async(&config.url).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                debug!("connect to {} failed: {}", config.url, e);
                tokio::time::sleep(config.reconnect_interval).await;
                continue;
            }
        };
        info!("chat channel connected to {}", config.url);
        if event_tx.send(ChannelEvent::Connected).is_err() {
            return;
        }

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        loop {
            tokio::select! {
                out = outbound_rx.recv() => {
                    let text = match out {
                        Some(t) => t,
                        None => {
                            // Controller gone; close and exit.
                            let _ = ws_tx.close().await;
                            return;
                        }
                    };
                    if let Err(e) = ws_tx.send(tungstenite::Message::Text(text.into())).await {
                        warn!("send failed: {}", e);
                        let _ = event_tx.send(ChannelEvent::SendFailed(e.to_string()));
                        break;
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            match serde_json::from_str::<ServerMessage>(&text) {
                                Ok(ServerMessage::AiResponse(content)) => {
                                    let _ = event_tx.send(ChannelEvent::Response(content));
                                }
                                Ok(ServerMessage::Error(content)) => {
                                    let _ = event_tx.send(ChannelEvent::ServerError(content));
                                }
                                Err(e) => warn!("unparseable frame dropped: {}", e),
                            }
                        }
                        Some(Ok(tungstenite::Message::Close(frame))) => {
                            info!("server closed the channel: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("channel error: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if event_tx.send(ChannelEvent::Disconnected).is_err() {
            return;
        }
        tokio::time::sleep(config.reconnect_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ai_response() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"ai_response","content":"불을 켰습니다."}"#).unwrap();
        assert_eq!(msg, ServerMessage::AiResponse("불을 켰습니다.".to_string()));
    }

    #[test]
    fn parses_error() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"error","content":"boom"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Error("boom".to_string()));
    }

    #[test]
    fn rejects_unknown_type() {
        let res = serde_json::from_str::<ServerMessage>(r#"{"type":"ping","content":""}"#);
        assert!(res.is_err());
    }

    #[test]
    fn channel_config_defaults() {
        let c = ChannelConfig::default();
        assert_eq!(c.url, "ws://127.0.0.1:8000/ws");
        assert_eq!(c.reconnect_interval, Duration::from_secs(5));
    }
}
