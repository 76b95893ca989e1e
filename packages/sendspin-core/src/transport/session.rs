//! WebSocket session connecting to a single SendSpin server.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{is_fatal_close_code, TransportState};
use crate::error::{SendSpinError, SendSpinResult};
use crate::events::{EventEmitter, TransportEvent};
use crate::protocol::codec::{decode_record, AudioRecord};
use crate::protocol::constants::KEEPALIVE_INTERVAL_SECS;
use crate::protocol::messages::ControlMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// A connected session to a SendSpin server.
///
/// Text frames are parsed as [`ControlMessage`]s and delivered on
/// [`SessionTransport::recv`]; binary frames are parsed as
/// [`AudioRecord`]s and delivered on [`SessionTransport::recv_audio`].
/// `auth()` reads its ack directly off the same channel `recv()` pulls
/// from, so the `auth_ok`/`auth_failed` frame is consumed before the
/// caller's own `recv()` loop ever sees it.
pub struct SessionTransport {
    state: Arc<AtomicU8>,
    ws_tx: Arc<AsyncMutex<WsSink>>,
    messages: AsyncMutex<UnboundedReceiver<ControlMessage>>,
    audio: AsyncMutex<UnboundedReceiver<AudioRecord>>,
    emitter: Arc<dyn EventEmitter>,
}

fn state_to_u8(state: TransportState) -> u8 {
    state as u8
}

impl SessionTransport {
    /// Connects to `url`, spawns the router and keepalive tasks, and
    /// returns once the WebSocket handshake has completed. Authentication
    /// (if required) happens afterwards via [`SessionTransport::auth`].
    pub async fn connect(url: &str, emitter: Arc<dyn EventEmitter>) -> SendSpinResult<Self> {
        emitter.emit_transport(TransportEvent::Connecting);
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| SendSpinError::Transport(format!("connect failed: {e}")))?;
        let (write, read) = ws_stream.split();

        let (message_tx, message_rx) = unbounded_channel();
        let (audio_tx, audio_rx) = unbounded_channel();
        let state = Arc::new(AtomicU8::new(state_to_u8(TransportState::Connected)));

        let router_state = state.clone();
        let router_emitter = emitter.clone();
        tokio::spawn(async move {
            Self::route(read, message_tx, audio_tx, router_state, router_emitter).await;
        });

        let ws_tx = Arc::new(AsyncMutex::new(write));
        let keepalive_tx = ws_tx.clone();
        let keepalive_state = state.clone();
        tokio::spawn(async move {
            Self::keepalive_loop(keepalive_tx, keepalive_state).await;
        });

        emitter.emit_transport(TransportEvent::Connected);
        Ok(Self {
            state,
            ws_tx,
            messages: AsyncMutex::new(message_rx),
            audio: AsyncMutex::new(audio_rx),
            emitter,
        })
    }

    /// Sends the `auth` message and waits for the server's ack, swallowing
    /// the ack frame so it never reaches `recv`.
    pub async fn auth(&self, token: String) -> SendSpinResult<()> {
        self.send(&ControlMessage::Auth { token }).await?;

        match self.messages.lock().await.recv().await {
            Some(ControlMessage::AuthOk) => {
                self.emitter.emit_transport(TransportEvent::AuthOk);
                Ok(())
            }
            Some(ControlMessage::AuthFailed { reason }) => {
                self.emitter.emit_transport(TransportEvent::AuthFailed {
                    reason: reason.clone(),
                });
                Err(SendSpinError::Auth(reason))
            }
            Some(other) => Err(SendSpinError::Protocol(format!(
                "expected auth ack, got {other:?}"
            ))),
            None => Err(SendSpinError::Transport(
                "connection closed during auth".into(),
            )),
        }
    }

    /// Serializes and sends a control message as a text frame.
    pub async fn send(&self, message: &ControlMessage) -> SendSpinResult<()> {
        let json = message
            .to_json()
            .map_err(|e| SendSpinError::Protocol(e.to_string()))?;
        self.ws_tx
            .lock()
            .await
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|e| SendSpinError::Transport(e.to_string()))
    }

    /// Receives the next control message forwarded by the router task.
    pub async fn recv(&self) -> Option<ControlMessage> {
        self.messages.lock().await.recv().await
    }

    /// Receives the next decoded audio record.
    pub async fn recv_audio(&self) -> Option<AudioRecord> {
        self.audio.lock().await.recv().await
    }

    pub fn state(&self) -> TransportState {
        match self.state.load(Ordering::Acquire) {
            0 => TransportState::Disconnected,
            1 => TransportState::Connecting,
            2 => TransportState::Connected,
            3 => TransportState::Closing,
            4 => TransportState::Closed,
            _ => TransportState::Failed,
        }
    }

    /// Sends a close frame and marks the transport closing.
    ///
    /// A no-op if the transport is already `Closing`, `Closed`, or `Failed`
    /// — whether because `close()` already ran once, or because the peer
    /// closed first and `route()` already drove the terminal transition.
    /// Only the caller that wins the `Connected → Closing` move sends the
    /// frame and later emits `TransportEvent::Closed`.
    pub async fn close(&self, code: u16, reason: &str) -> SendSpinResult<()> {
        let won = self
            .state
            .compare_exchange(
                state_to_u8(TransportState::Connected),
                state_to_u8(TransportState::Closing),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !won {
            return Ok(());
        }

        let frame = WsMessage::Close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
            code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(code),
            reason: reason.to_string().into(),
        }));
        let result = self.ws_tx.lock().await.send(frame).await;

        if Self::terminal_transition(&self.state, TransportState::Closed) {
            self.emitter.emit_transport(TransportEvent::Closed { code });
        }
        result.map_err(|e| SendSpinError::Transport(e.to_string()))
    }

    /// Moves `state` into `target` unless it's already `Closed`/`Failed`,
    /// returning whether this call is the one that made the move. Used to
    /// guarantee the terminal event fires exactly once regardless of
    /// which of `close()`/`route()`/the keepalive loop observes the
    /// disconnect first.
    fn terminal_transition(state: &Arc<AtomicU8>, target: TransportState) -> bool {
        loop {
            let current = state.load(Ordering::Acquire);
            if current == state_to_u8(TransportState::Closed)
                || current == state_to_u8(TransportState::Failed)
            {
                return false;
            }
            if state
                .compare_exchange(
                    current,
                    state_to_u8(target),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    async fn keepalive_loop(ws_tx: Arc<AsyncMutex<WsSink>>, state: Arc<AtomicU8>) {
        let mut interval = tokio::time::interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECS));
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            if state.load(Ordering::Acquire) != state_to_u8(TransportState::Connected) {
                return;
            }
            let mut tx = ws_tx.lock().await;
            if tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                return;
            }
        }
    }

    async fn route(
        mut read: SplitStream<WsStream>,
        message_tx: UnboundedSender<ControlMessage>,
        audio_tx: UnboundedSender<AudioRecord>,
        state: Arc<AtomicU8>,
        emitter: Arc<dyn EventEmitter>,
    ) {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match ControlMessage::from_json(&text) {
                    Ok(parsed) => {
                        let _ = message_tx.send(parsed);
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping malformed control message");
                    }
                },
                Ok(WsMessage::Binary(data)) => match decode_record(&data) {
                    Ok(record) => {
                        let _ = audio_tx.send(record);
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping malformed audio record");
                    }
                },
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
                Ok(WsMessage::Close(frame)) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(1000);
                    if is_fatal_close_code(code) {
                        if Self::terminal_transition(&state, TransportState::Failed) {
                            emitter.emit_transport(TransportEvent::Failed {
                                reason: format!("server closed with fatal code {code}"),
                            });
                        }
                    } else if Self::terminal_transition(&state, TransportState::Closed) {
                        emitter.emit_transport(TransportEvent::Closed { code });
                    }
                    return;
                }
                Ok(WsMessage::Frame(_)) => {}
                Err(e) => {
                    emitter.emit_transport(TransportEvent::RecoverableError {
                        reason: e.to_string(),
                    });
                }
            }
        }
        // Stream ended without an explicit close frame.
        if Self::terminal_transition(&state, TransportState::Failed) {
            emitter.emit_transport(TransportEvent::Failed {
                reason: "connection dropped".into(),
            });
        }
    }
}
