// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::credential::BearerClaim;
use crate::error::GatewayError;
use crate::session::Session;
use crate::state::GatewayState;

/// Pull the bearer out of an `Authorization: Bearer ...` header.
pub fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_owned())
}

/// Pull the bearer from `?token=...`, falling back to the header. Browsers
/// cannot set headers on WebSocket upgrades, so the query param wins.
pub fn bearer_from_query_or_headers(token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    match token {
        Some(t) if !t.is_empty() => Some(t.to_owned()),
        _ => bearer_from_headers(headers),
    }
}

/// Verify a user bearer and resolve its live session.
pub async fn authed_session(
    state: &GatewayState,
    headers: &HeaderMap,
) -> Result<(Arc<Session>, String), GatewayError> {
    let token = bearer_from_headers(headers).ok_or(GatewayError::MissingToken)?;
    match state.verifier.verify(&token)? {
        BearerClaim::User { session_id, user_id } => {
            let session =
                state.sessions.get(&session_id).await.ok_or(GatewayError::SessionExpired)?;
            Ok((session, user_id))
        }
        BearerClaim::Display { .. } => Err(GatewayError::InvalidToken),
    }
}

/// Axum middleware enforcing bearer authentication on the REST API.
///
/// Exempt: `/health`, `/api/login`, and the proxied display paths.
/// Upgrade failures must surface as close codes, so WS auth runs in the
/// handler.
pub async fn auth_layer(
    state: State<Arc<GatewayState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();

    if path == "/health"
        || path == "/api/login"
        || path.starts_with("/vnc/")
        || path.starts_with("/spice/")
    {
        return next.run(req).await;
    }

    let token = match bearer_from_headers(req.headers()) {
        Some(t) => t,
        None => return GatewayError::MissingToken.to_http_response().into_response(),
    };
    if let Err(e) = state.verifier.verify(&token) {
        return e.to_http_response().into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
