// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket dispatcher for `/vnc/{id}` and `/spice/{id}`.
//!
//! The full failure pipeline runs after the upgrade so every outcome
//! reaches the client as a close code; this module is the only place that
//! issues them. Inbound frames are buffered from the moment the socket
//! exists so a SPICE handshake sent on `open` is never lost.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{ConnectInfo, Path, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::credential::BearerClaim;
use crate::error::GatewayError;
use crate::proxy::dial::dial;
use crate::proxy::splice::{self, buffer_while, EarlyBuffer, Raced};
use crate::registry::{ConnectionRecord, Protocol};
use crate::resolver::ResolveSource;
use crate::session::ConnectionInfo as TargetInfo;
use crate::state::{epoch_ms, GatewayState};
use crate::transport::auth::bearer_from_query_or_headers;

/// Query parameters for the proxied WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /vnc/{vmId}` — WebSocket upgrade for a VNC display.
pub async fn vnc_handler(
    State(state): State<Arc<GatewayState>>,
    Path(vm_id): Path<String>,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, vm_id, Protocol::Vnc, query, addr, headers, ws)
}

/// `GET /spice/{vmId}` — WebSocket upgrade for a SPICE channel.
pub async fn spice_handler(
    State(state): State<Arc<GatewayState>>,
    Path(vm_id): Path<String>,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, vm_id, Protocol::Spice, query, addr, headers, ws)
}

/// Router fallback. A WebSocket upgrade to any unrecognised path completes
/// and then closes with 1002; plain HTTP gets a 404 envelope.
pub async fn fallback(
    ws: Result<WebSocketUpgrade, axum::extract::ws::rejection::WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => ws
            .on_upgrade(|mut socket| async move {
                refuse(&mut socket, &GatewayError::InvalidPath).await;
            })
            .into_response(),
        Err(_) => GatewayError::InvalidPath.to_http_response().into_response(),
    }
}

fn upgrade(
    state: Arc<GatewayState>,
    vm_id: String,
    protocol: Protocol,
    query: WsQuery,
    addr: SocketAddr,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let bearer = bearer_from_query_or_headers(query.token.as_deref(), &headers);
    let ws = negotiate_subprotocol(&headers, ws);

    ws.on_upgrade(move |socket| {
        handle_connection(socket, state, vm_id, protocol, bearer, addr.to_string())
    })
    .into_response()
}

/// Accept `binary` when offered, otherwise the first offered protocol,
/// otherwise negotiate none.
fn negotiate_subprotocol(headers: &HeaderMap, ws: WebSocketUpgrade) -> WebSocketUpgrade {
    let offered = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let offered: Vec<&str> = offered.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();

    let chosen =
        if offered.contains(&"binary") { Some("binary") } else { offered.first().copied() };
    match chosen {
        Some(chosen) => ws.protocols([chosen.to_owned()]),
        None => ws,
    }
}

/// Post-upgrade pipeline: buffer -> verify -> resolve -> admit -> dial ->
/// splice. Buffering covers every await between the upgrade and the splice.
async fn handle_connection(
    mut socket: WebSocket,
    state: Arc<GatewayState>,
    vm_id: String,
    protocol: Protocol,
    bearer: Option<String>,
    client_addr: String,
) {
    if vm_id.trim().is_empty() {
        refuse(&mut socket, &GatewayError::InvalidPath).await;
        return;
    }
    let Some(bearer) = bearer else {
        refuse(&mut socket, &GatewayError::MissingToken).await;
        return;
    };

    let mut buffer = EarlyBuffer::new(state.config.buffer_max_bytes);

    // Verify + resolve, capturing any frames the client sends meanwhile.
    let target = {
        let resolve = resolve_target(&state, &bearer, &vm_id, protocol);
        match buffer_while(&mut socket, &mut buffer, resolve).await {
            Raced::Done(Ok(target)) => target,
            Raced::Done(Err(e)) => {
                refuse(&mut socket, &e).await;
                return;
            }
            Raced::ClientClosed => return,
            Raced::Overflow => {
                refuse(&mut socket, &GatewayError::BufferOverflow).await;
                return;
            }
        }
    };

    // Admission reserves the slot before the dial starts.
    let conn_id = match state.registry.admit(&vm_id).await {
        Ok(id) => id,
        Err(e) => {
            tracing::info!(vm_id = %vm_id, err = %e, "admission denied");
            refuse(&mut socket, &e).await;
            return;
        }
    };

    let tcp = {
        let dialing = dial(&state.config, &target.host, target.port);
        match buffer_while(&mut socket, &mut buffer, dialing).await {
            Raced::Done(Ok(tcp)) => tcp,
            Raced::Done(Err(e)) => {
                state.registry.unregister(&vm_id, &conn_id).await;
                tracing::warn!(vm_id = %vm_id, err = %e, "upstream dial failed");
                refuse(&mut socket, &e).await;
                return;
            }
            Raced::ClientClosed => {
                state.registry.unregister(&vm_id, &conn_id).await;
                return;
            }
            Raced::Overflow => {
                state.registry.unregister(&vm_id, &conn_id).await;
                refuse(&mut socket, &GatewayError::BufferOverflow).await;
                return;
            }
        }
    };

    let upstream_addr = format!("{}:{}", target.host, target.port);
    let (control, control_rx) = mpsc::unbounded_channel();
    let record = Arc::new(ConnectionRecord {
        id: conn_id.clone(),
        vm_id: vm_id.clone(),
        protocol,
        upstream_addr: upstream_addr.clone(),
        client_addr,
        started_at: Instant::now(),
        last_activity: AtomicU64::new(epoch_ms()),
        is_alive: AtomicBool::new(true),
        // Per-connection token: heartbeat reaping and forced termination.
        // Graceful shutdown goes through the control channel instead so the
        // client sees a 1001 close frame.
        cancel: CancellationToken::new(),
        control,
    });
    state.registry.register(Arc::clone(&record)).await;
    tracing::info!(
        connection_id = %conn_id,
        vm_id = %vm_id,
        protocol = protocol.as_str(),
        upstream = %upstream_addr,
        buffered = buffer.byte_len(),
        "session spliced"
    );

    splice::run(socket, buffer, tcp, Arc::clone(&record), control_rx, &state.config).await;

    state.registry.unregister(&vm_id, &conn_id).await;
    tracing::info!(connection_id = %conn_id, vm_id = %vm_id, "session closed");
}

/// Run the credential verifier and target resolver for an upgrade.
async fn resolve_target(
    state: &GatewayState,
    bearer: &str,
    vm_id: &str,
    protocol: Protocol,
) -> Result<TargetInfo, GatewayError> {
    match state.verifier.verify(bearer)? {
        BearerClaim::User { session_id, .. } => {
            let session =
                state.sessions.get(&session_id).await.ok_or(GatewayError::SessionExpired)?;
            state.resolver.resolve(ResolveSource::Session(&session), vm_id, protocol).await
        }
        BearerClaim::Display { vm_id: claimed_vm, upstream_token } => {
            // A display credential is bound to exactly one VM.
            if claimed_vm != vm_id {
                return Err(GatewayError::Forbidden);
            }
            state
                .resolver
                .resolve(ResolveSource::Display { upstream_token: &upstream_token }, vm_id, protocol)
                .await
        }
    }
}

/// Best-effort structured error frame, then the close code.
async fn refuse(socket: &mut WebSocket, err: &GatewayError) {
    tracing::info!(err = %err, code = err.close_code(), "refusing connection");
    let _ = socket.send(Message::Text(err.to_error_frame().into())).await;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: err.close_code(),
            reason: err.to_string().into(),
        })))
        .await;
}
