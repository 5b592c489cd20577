//! WebSocket channel: one dialogue session per connection.
//!
//! ## Frames
//!
//! ```text
//! client → server  {"type":"utterance","text":"..."}
//! server → client  {"type":"state","state":"listening|replying|ended"}
//!                  {"type":"utterance","source":"ai|system","text":"..."}
//!                  {"type":"error","message":"..."}
//! ```
//!
//! The server closes the socket after the session reaches `ended`. Inbound
//! utterances that arrive while a reply is in flight queue up and are
//! submitted in order once the session is listening again.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::error::AppError;
use crate::dialogue::{DialogueError, EventSink, SessionEvent, SessionFactory, SessionState};
use crate::runtime::{Component, ComponentFuture};

// ── Frames ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Ai,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    State { state: SessionState },
    Utterance { source: Source, text: String },
    Error { message: String },
}

impl From<SessionEvent> for ServerFrame {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::StateChanged(state) => ServerFrame::State { state },
            SessionEvent::Utterance { text, is_system } => ServerFrame::Utterance {
                source: if is_system { Source::System } else { Source::Ai },
                text,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Utterance { text: String },
}

// ── WsChannel ────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct WsState {
    factory: Arc<SessionFactory>,
    shutdown: CancellationToken,
}

pub struct WsChannel {
    channel_id: String,
    bind_addr: String,
    factory: SessionFactory,
}

impl WsChannel {
    pub fn new(
        channel_id: impl Into<String>,
        bind_addr: impl Into<String>,
        factory: SessionFactory,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            bind_addr: bind_addr.into(),
            factory,
        }
    }
}

impl Component for WsChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_ws(self.channel_id, self.bind_addr, self.factory, shutdown))
    }
}

async fn run_ws(
    channel_id: String,
    bind_addr: String,
    factory: SessionFactory,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Comms(format!("ws bind failed on {bind_addr}: {e}")))?;

    info!(%channel_id, %bind_addr, "ws channel listening");

    let router = build_router(factory, shutdown.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Comms(format!("ws server error: {e}")))?;

    info!(%channel_id, "ws channel shut down");
    Ok(())
}

/// Routes `/` and `/ws` to the session handler. Sessions opened through the
/// router stop when `shutdown` is cancelled.
pub fn build_router(factory: SessionFactory, shutdown: CancellationToken) -> Router {
    let state = WsState { factory: Arc::new(factory), shutdown };
    Router::new()
        .route("/", get(ws_upgrade))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state.factory, state.shutdown))
}

// ── Per-connection session ───────────────────────────────────────────────────

async fn serve_socket(socket: WebSocket, factory: Arc<SessionFactory>, shutdown: CancellationToken) {
    debug!("ws connection opened");
    let (mut sink, mut stream) = socket.split();

    let (events, mut event_rx) = EventSink::channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();

    // Session events are drained before direct frames, so an error frame
    // never overtakes the events emitted by the submit that produced it.
    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;
                Some(event) = event_rx.recv() => ServerFrame::from(event),
                Some(frame) = out_rx.recv() => frame,
                else => break,
            };
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(e) => {
                    warn!("ws frame encode failed: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let disconnected = shutdown.child_token();
    let (in_tx, mut in_rx) = mpsc::unbounded_channel::<String>();
    let reader = tokio::spawn({
        let disconnected = disconnected.clone();
        let out_tx = out_tx.clone();
        async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(raw)) => match serde_json::from_str::<ClientFrame>(raw.as_str()) {
                        Ok(ClientFrame::Utterance { text }) => {
                            if in_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = out_tx.send(ServerFrame::Error {
                                message: format!("invalid frame: {e}"),
                            });
                        }
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            disconnected.cancel();
        }
    });

    let mut session = factory.open(events);

    loop {
        let text = tokio::select! {
            biased;
            _ = disconnected.cancelled() => break,
            next = in_rx.recv() => match next {
                Some(text) => text,
                None => break,
            },
        };

        let outcome = tokio::select! {
            biased;
            _ = disconnected.cancelled() => {
                debug!("ws peer gone during reply, discarding session");
                break;
            }
            r = session.submit([text]) => r,
        };

        match outcome {
            Ok(SessionState::Ended) => break,
            Ok(_) => {}
            Err(e @ DialogueError::RoundLimitExceeded(_)) => {
                let _ = out_tx.send(ServerFrame::Error { message: e.to_string() });
            }
            Err(e) => {
                warn!(error = %e, "ws session unusable, closing connection");
                let _ = out_tx.send(ServerFrame::Error { message: e.to_string() });
                break;
            }
        }
    }

    reader.abort();
    drop(session);
    drop(out_tx);
    let _ = writer.await;
    debug!("ws connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandRegistry;
    use crate::dialogue::{CallDispatcher, DialogueSettings};
    use crate::llm::LlmProvider;
    use crate::llm::providers::scripted::ScriptedProvider;

    fn factory() -> SessionFactory {
        SessionFactory::new(
            LlmProvider::Scripted(ScriptedProvider::default()),
            CallDispatcher::Commands(Arc::new(CommandRegistry::new())),
            DialogueSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn state_frame_shape() {
        let frame = ServerFrame::from(SessionEvent::StateChanged(SessionState::Replying));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json, serde_json::json!({"type": "state", "state": "replying"}));
    }

    #[test]
    fn utterance_frame_marks_source() {
        let ai = ServerFrame::from(SessionEvent::Utterance { text: "Hi".into(), is_system: false });
        let sys = ServerFrame::from(SessionEvent::Utterance { text: "ok".into(), is_system: true });
        assert_eq!(
            serde_json::to_value(&ai).unwrap(),
            serde_json::json!({"type": "utterance", "source": "ai", "text": "Hi"})
        );
        assert_eq!(
            serde_json::to_value(&sys).unwrap(),
            serde_json::json!({"type": "utterance", "source": "system", "text": "ok"})
        );
    }

    #[test]
    fn error_frame_shape() {
        let frame = ServerFrame::Error { message: "boom".into() };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            serde_json::json!({"type": "error", "message": "boom"})
        );
    }

    #[test]
    fn client_frame_parses_utterance() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"utterance","text":"hello"}"#).unwrap();
        let ClientFrame::Utterance { text } = frame;
        assert_eq!(text, "hello");
    }

    #[test]
    fn client_frame_rejects_unknown_type() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"ping"}"#).is_err());
    }

    #[tokio::test]
    async fn bind_failure_is_comms_error() {
        let err = run_ws("ws-test".into(), "not-an-address".into(), factory(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ws bind failed"));
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_ws(
            "ws-test".into(),
            "127.0.0.1:0".into(),
            factory(),
            shutdown.clone(),
        ));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
