// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST handlers: session lifecycle and connection-info endpoints consumed
//! by the browser SDK before it opens the proxied WebSocket.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::registry::Protocol;
use crate::resolver::ResolveSource;
use crate::session::{Session, VmInfo, VmKind};
use crate::state::GatewayState;
use crate::transport::auth::authed_session;
use crate::upstream::types::VmSummary;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub connections: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub vms: Vec<VmInfo>,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub removed: bool,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// WebSocket path the SDK should open next.
    pub path: String,
    /// Short-lived display bearer for the upgrade.
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: usize,
    pub by_vm: HashMap<String, usize>,
    pub records: Vec<crate::registry::ConnectionSummary>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`
pub async fn health(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        sessions: s.sessions.len().await,
        connections: s.registry.count(),
    })
}

/// `POST /api/login` — authenticate against the management API and mint a
/// session plus a user bearer.
pub async fn login(
    State(s): State<Arc<GatewayState>>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let login = match s.upstream.login(&req.username, &req.password).await {
        Ok(ok) => ok,
        Err(e) => {
            tracing::info!(username = %req.username, err = %e, "login rejected");
            return e.to_http_response().into_response();
        }
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let vms: Vec<VmInfo> = login.vms.into_iter().map(vm_from_summary).collect();
    let session = Arc::new(Session::new(session_id.clone(), login.token, vms.clone()));
    s.sessions.put(session).await;

    let token = match s.verifier.issue_user(&session_id, &req.username, s.config.session_ttl_secs) {
        Ok(t) => t,
        Err(e) => return e.to_http_response().into_response(),
    };

    tracing::info!(session_id = %session_id, username = %req.username, vms = vms.len(), "session created");
    Json(LoginResponse { token, vms }).into_response()
}

/// `POST /api/logout`
pub async fn logout(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let (session, _) = match authed_session(&s, &headers).await {
        Ok(ok) => ok,
        Err(e) => return e.to_http_response().into_response(),
    };

    let removed = s.sessions.remove(&session.id).await.is_some();
    if removed {
        tracing::info!(session_id = %session.id, "session removed");
    }
    Json(LogoutResponse { removed }).into_response()
}

/// `POST /api/refresh` — retire the session id and issue a new bearer. The
/// payload (upstream token, inventory, credential cache) is carried over.
pub async fn refresh(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let (session, user_id) = match authed_session(&s, &headers).await {
        Ok(ok) => ok,
        Err(e) => return e.to_http_response().into_response(),
    };

    let new_id = uuid::Uuid::new_v4().to_string();
    let fresh = match s.sessions.replace(&session.id, new_id).await {
        Some(fresh) => fresh,
        None => return crate::error::GatewayError::SessionExpired.to_http_response().into_response(),
    };

    let token = match s.verifier.issue_user(&fresh.id, &user_id, s.config.session_ttl_secs) {
        Ok(t) => t,
        Err(e) => return e.to_http_response().into_response(),
    };

    tracing::info!(old_session = %session.id, new_session = %fresh.id, "session refreshed");
    Json(LoginResponse { token, vms: fresh.vms.clone() }).into_response()
}

/// `GET /api/vms` — inventory snapshot taken at login.
pub async fn list_vms(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    match authed_session(&s, &headers).await {
        Ok((session, _)) => Json(session.vms.clone()).into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

/// `POST /api/vnc/connect/{vmId}` — resolve (and cache) VNC connection info.
pub async fn vnc_connect(
    State(s): State<Arc<GatewayState>>,
    Path(vm_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    connect(&s, &vm_id, Protocol::Vnc, &headers).await
}

/// `POST /api/spice/connect/{vmId}` — resolve (and cache) SPICE connection info.
pub async fn spice_connect(
    State(s): State<Arc<GatewayState>>,
    Path(vm_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    connect(&s, &vm_id, Protocol::Spice, &headers).await
}

/// `GET /api/stats` — registry snapshot.
pub async fn stats(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = authed_session(&s, &headers).await {
        return e.to_http_response().into_response();
    }

    let records = s.registry.snapshot().await;
    let mut by_vm: HashMap<String, usize> = HashMap::new();
    for record in &records {
        *by_vm.entry(record.vm_id.clone()).or_default() += 1;
    }
    Json(StatsResponse { connections: s.registry.count(), by_vm, records }).into_response()
}

async fn connect(
    s: &GatewayState,
    vm_id: &str,
    protocol: Protocol,
    headers: &HeaderMap,
) -> axum::response::Response {
    let (session, _) = match authed_session(s, headers).await {
        Ok(ok) => ok,
        Err(e) => return e.to_http_response().into_response(),
    };

    let info = match s.resolver.resolve(ResolveSource::Session(&session), vm_id, protocol).await {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(vm_id, protocol = protocol.as_str(), err = %e, "resolve failed");
            return e.to_http_response().into_response();
        }
    };

    let token = match s.verifier.issue_display(
        vm_id,
        &session.upstream_token,
        s.config.display_ttl_secs,
    ) {
        Ok(t) => t,
        Err(e) => return e.to_http_response().into_response(),
    };

    Json(ConnectResponse {
        host: info.host,
        port: info.port,
        password: info.password,
        path: format!("/{}/{vm_id}", protocol.as_str()),
        token,
    })
    .into_response()
}

fn vm_from_summary(vm: VmSummary) -> VmInfo {
    let kind = if vm.kind.eq_ignore_ascii_case("pool") { VmKind::Pool } else { VmKind::Standalone };
    VmInfo { id: vm.id, name: vm.name, status: vm.status, kind }
}
