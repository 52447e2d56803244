// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bidirectional byte pump between one WebSocket and one TCP socket.
//!
//! A connection moves through `Buffering -> Streaming -> Closed`. Browsers
//! (SPICE clients in particular) transmit their handshake the moment the
//! socket opens, before the upstream TCP dial has finished, so inbound
//! frames are captured into an ordered, size-capped buffer while the setup
//! pipeline runs. When the dial succeeds the buffer is flushed to TCP in
//! arrival order, one write per frame, and the streaming loop takes over.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::config::GatewayConfig;
use crate::error::{CLOSE_INTERNAL, CLOSE_NORMAL};
use crate::registry::{ConnectionRecord, ControlMsg};
use crate::state::epoch_ms;

/// Outcome of racing a setup step against the buffering WebSocket.
pub enum Raced<T> {
    /// The setup step finished.
    Done(T),
    /// The client closed or errored before setup finished.
    ClientClosed,
    /// The buffer byte cap was exceeded.
    Overflow,
}

/// Ordered pre-dial frame buffer with a byte cap.
pub struct EarlyBuffer {
    frames: Vec<Bytes>,
    total: usize,
    cap: usize,
}

impl EarlyBuffer {
    pub fn new(cap: usize) -> Self {
        Self { frames: Vec::new(), total: 0, cap }
    }

    /// Append a frame payload. Returns false when the cap would be exceeded;
    /// the frame is not stored.
    pub fn push(&mut self, payload: Bytes) -> bool {
        if self.total + payload.len() > self.cap {
            return false;
        }
        self.total += payload.len();
        self.frames.push(payload);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.total
    }

    fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }
}

/// Drive `fut` while capturing every inbound frame into `buffer`.
///
/// Frames are stored verbatim (text frames as their raw bytes) so the flush
/// reproduces the client's byte stream exactly.
pub async fn buffer_while<F, T>(
    socket: &mut WebSocket,
    buffer: &mut EarlyBuffer,
    fut: F,
) -> Raced<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return Raced::Done(out),
            msg = socket.recv() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    if !buffer.push(data) {
                        return Raced::Overflow;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if !buffer.push(Bytes::from(text.as_str().to_owned())) {
                        return Raced::Overflow;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Raced::ClientClosed,
                Some(Ok(_)) => {}
                Some(Err(_)) => return Raced::ClientClosed,
            }
        }
    }
}

/// Streaming phase: flush the early buffer, then pump bytes both ways until
/// either side closes. The caller unregisters the record afterwards.
pub async fn run(
    socket: WebSocket,
    buffer: EarlyBuffer,
    tcp: TcpStream,
    record: Arc<ConnectionRecord>,
    mut control_rx: mpsc::UnboundedReceiver<ControlMsg>,
    config: &GatewayConfig,
) {
    let (mut tcp_read, mut tcp_write) = tcp.into_split();
    let (mut ws_tx, mut ws_rx) = socket.split();

    for frame in buffer.into_frames() {
        if tcp_write.write_all(&frame).await.is_err() {
            let _ = send_close(&mut ws_tx, CLOSE_INTERNAL, "internal error").await;
            return;
        }
    }

    let mut read_buf = vec![0u8; 16 * 1024];

    loop {
        tokio::select! {
            _ = record.cancel.cancelled() => {
                let _ = tcp_write.shutdown().await;
                break;
            }

            cmd = control_rx.recv() => match cmd {
                Some(ControlMsg::Ping) => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        let _ = tcp_write.shutdown().await;
                        break;
                    }
                }
                Some(ControlMsg::Close { code, reason }) => {
                    let _ = send_close(&mut ws_tx, code, reason).await;
                    let _ = tcp_write.shutdown().await;
                    break;
                }
                None => {
                    let _ = tcp_write.shutdown().await;
                    break;
                }
            },

            // Client -> upstream.
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    record.touch();
                    if tcp_write.write_all(&data).await.is_err() {
                        let _ = send_close(&mut ws_tx, CLOSE_INTERNAL, "internal error").await;
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    record.touch();
                    match classify_text(text.as_str()) {
                        ClientText::Ping => {
                            if ws_tx.send(Message::Text(pong_reply().into())).await.is_err() {
                                let _ = tcp_write.shutdown().await;
                                break;
                            }
                        }
                        ClientText::Observed(kind) => {
                            tracing::debug!(connection_id = %record.id, kind, "control message observed");
                        }
                        ClientText::Unknown(kind) => {
                            tracing::debug!(connection_id = %record.id, kind = %kind, "unknown control message ignored");
                        }
                        ClientText::Raw => {
                            if config.text_fallback {
                                if tcp_write.write_all(text.as_str().as_bytes()).await.is_err() {
                                    let _ = send_close(&mut ws_tx, CLOSE_INTERNAL, "internal error").await;
                                    break;
                                }
                            } else {
                                tracing::debug!(connection_id = %record.id, "non-JSON text frame dropped");
                            }
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => record.mark_alive(),
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    // Client hung up: half-close the upstream write side.
                    let _ = tcp_write.shutdown().await;
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %record.id, err = %e, "websocket error");
                    let _ = tcp_write.shutdown().await;
                    break;
                }
            },

            // Upstream -> client. One TCP read becomes exactly one binary frame.
            read = tcp_read.read(&mut read_buf) => match read {
                Ok(0) => {
                    let _ = send_close(&mut ws_tx, CLOSE_NORMAL, "VNC connection closed").await;
                    break;
                }
                Ok(n) => {
                    record.touch();
                    let chunk = Bytes::copy_from_slice(&read_buf[..n]);
                    if ws_tx.send(Message::Binary(chunk)).await.is_err() {
                        let _ = tcp_write.shutdown().await;
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(connection_id = %record.id, err = %e, "upstream read error");
                    let _ = send_close(&mut ws_tx, CLOSE_INTERNAL, "internal error").await;
                    break;
                }
            },
        }
    }
}

async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    ws_tx.send(Message::Close(Some(CloseFrame { code, reason: reason.to_owned().into() }))).await
}

/// Classification of a text frame received mid-session.
#[derive(Debug, PartialEq, Eq)]
enum ClientText {
    /// `{"type":"ping"}`: answered with a pong carrying a timestamp.
    Ping,
    /// Recognised control message with no TCP side effect in this revision.
    Observed(&'static str),
    /// Valid control envelope with an unrecognised type.
    Unknown(String),
    /// Not a control message; candidate for the legacy raw passthrough.
    Raw,
}

fn classify_text(text: &str) -> ClientText {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return ClientText::Raw;
    };
    let Some(kind) = value.get("type").and_then(|v| v.as_str()) else {
        return ClientText::Raw;
    };
    match kind {
        "ping" => ClientText::Ping,
        "resize" => ClientText::Observed("resize"),
        "quality" => ClientText::Observed("quality"),
        "clipboard" => ClientText::Observed("clipboard"),
        other => ClientText::Unknown(other.to_owned()),
    }
}

fn pong_reply() -> String {
    serde_json::json!({ "type": "pong", "timestamp": epoch_ms() }).to_string()
}

#[cfg(test)]
#[path = "splice_tests.rs"]
mod tests;
