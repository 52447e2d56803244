// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream domain code for a wrong VNC/SPICE password.
pub const RC_WRONG_PASSWORD: i64 = 5090;
/// Upstream domain code for an unknown user.
pub const RC_USER_NOT_FOUND: i64 = 5098;

/// WebSocket close codes issued by the gateway. The dispatcher is the only
/// place these reach the wire.
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
pub const CLOSE_POLICY: u16 = 1008;
pub const CLOSE_INTERNAL: u16 = 1011;

/// Failure taxonomy for the proxy pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No bearer presented on the upgrade or API call.
    MissingToken,
    /// Bearer failed signature verification or is malformed.
    InvalidToken,
    /// Bearer signature is valid but the credential has expired.
    ExpiredToken { expired_at: u64 },
    /// The session id in a valid bearer no longer resolves to a live session.
    SessionExpired,
    /// Global connection cap reached.
    GlobalCapExceeded,
    /// Per-VM connection cap reached.
    VmCapExceeded,
    /// Upgrade path did not match `/vnc/{id}` or `/spice/{id}`, or the vm id
    /// was empty.
    InvalidPath,
    /// The management API could not be reached.
    UpstreamUnreachable(String),
    /// The management API answered with a non-OK envelope or HTTP status.
    UpstreamRejected { code: i64, message: String },
    /// The management API returned a body the gateway could not decode.
    UpstreamDecode(String),
    /// Management API: HTTP 404.
    VmNotFound,
    /// Management API: HTTP 403.
    Forbidden,
    /// Management API: HTTP 401.
    Unauthenticated,
    /// TCP dial retries exhausted.
    DialFailed(String),
    /// Pre-dial frame buffer exceeded its byte cap.
    BufferOverflow,
    /// Mid-session socket failure.
    Transport(String),
}

impl GatewayError {
    /// True for failures that are the client's fault authorization-wise:
    /// these close with 1008 instead of 1011.
    fn is_authorization_shaped(&self) -> bool {
        match self {
            Self::MissingToken
            | Self::InvalidToken
            | Self::ExpiredToken { .. }
            | Self::SessionExpired
            | Self::GlobalCapExceeded
            | Self::VmCapExceeded
            | Self::Forbidden
            | Self::Unauthenticated => true,
            Self::UpstreamRejected { code, .. } => {
                *code == RC_WRONG_PASSWORD || *code == RC_USER_NOT_FOUND
            }
            _ => false,
        }
    }

    /// WebSocket close code for this failure.
    pub fn close_code(&self) -> u16 {
        if matches!(self, Self::InvalidPath) {
            CLOSE_PROTOCOL_ERROR
        } else if self.is_authorization_shaped() {
            CLOSE_POLICY
        } else {
            CLOSE_INTERNAL
        }
    }

    /// HTTP status for the REST surface.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::MissingToken
            | Self::InvalidToken
            | Self::ExpiredToken { .. }
            | Self::SessionExpired
            | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::VmNotFound | Self::InvalidPath => StatusCode::NOT_FOUND,
            Self::GlobalCapExceeded | Self::VmCapExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamRejected { code, .. }
                if *code == RC_WRONG_PASSWORD || *code == RC_USER_NOT_FOUND =>
            {
                StatusCode::UNAUTHORIZED
            }
            Self::UpstreamUnreachable(_)
            | Self::UpstreamRejected { .. }
            | Self::UpstreamDecode(_)
            | Self::DialFailed(_) => StatusCode::BAD_GATEWAY,
            Self::BufferOverflow | Self::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Best-effort text frame sent before a pre-splice close.
    pub fn to_error_frame(&self) -> String {
        serde_json::to_string(&ErrorFrame { kind: "error", message: self.to_string() })
            .unwrap_or_else(|_| r#"{"type":"error","message":"internal error"}"#.to_owned())
    }

    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        let body = ErrorResponse { error: ErrorBody { message: self.to_string() } };
        (self.http_status(), Json(body))
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => f.write_str("Missing authentication token"),
            Self::InvalidToken => f.write_str("Invalid authentication token"),
            Self::ExpiredToken { expired_at } => {
                write!(f, "Authentication token expired at {expired_at}")
            }
            Self::SessionExpired => f.write_str("Session expired"),
            Self::GlobalCapExceeded => f.write_str("Too many connections"),
            Self::VmCapExceeded => f.write_str("Too many connections for this VM"),
            Self::InvalidPath => f.write_str("Invalid path"),
            Self::UpstreamUnreachable(e) => write!(f, "Upstream unreachable: {e}"),
            Self::UpstreamRejected { code, message } => {
                write!(f, "Upstream rejected request ({code}): {message}")
            }
            Self::UpstreamDecode(e) => write!(f, "Invalid upstream response: {e}"),
            Self::VmNotFound => f.write_str("VM not found"),
            Self::Forbidden => f.write_str("Forbidden"),
            Self::Unauthenticated => f.write_str("Unauthenticated"),
            Self::DialFailed(e) => write!(f, "Failed to connect to display server: {e}"),
            Self::BufferOverflow => f.write_str("Pre-connect buffer overflow"),
            Self::Transport(e) => write!(f, "Transport error: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Text frame body `{"type":"error","message":…}` surfaced to the client SDK.
#[derive(Debug, Serialize)]
struct ErrorFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    message: String,
}

/// Top-level error response envelope for the REST surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
