// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed envelopes for the management API.
//!
//! Every response carries a numeric `returnCode`: 200 means OK except for
//! the port endpoint, which uses 0. Anything else is a typed failure with
//! an accompanying message (5090 wrong password, 5098 user not found).

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// OK code for most endpoints.
pub const RC_OK: i64 = 200;
/// OK code for the port endpoint.
pub const RC_OK_PORT: i64 = 0;

/// Turn a non-OK envelope into a typed failure.
pub fn check_return_code(
    return_code: i64,
    ok: i64,
    message: Option<String>,
) -> Result<(), GatewayError> {
    if return_code == ok {
        return Ok(());
    }
    Err(GatewayError::UpstreamRejected {
        code: return_code,
        message: message.unwrap_or_else(|| "no message".to_owned()),
    })
}

// -- Requests -----------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmRequest<'a> {
    pub token: &'a str,
    pub vm_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpiceConnectionRequest<'a> {
    pub token: &'a str,
    pub vm_id: &'a str,
    /// Rendering configuration forwarded opaquely to the upstream.
    pub rendering: serde_json::Value,
}

// -- Responses ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub return_code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub vms: Option<Vec<VmSummary>>,
}

/// One VM in the login inventory.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSummary {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmConnectionInfoResponse {
    pub return_code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub host_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmPortResponse {
    pub return_code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub vnc_port: Option<u16>,
    #[serde(default)]
    pub spice_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VncPasswordResponse {
    pub return_code: i64,
    #[serde(default)]
    pub message: Option<String>,
    /// Base64-wrapped by the upstream; decoded exactly once at cache-fill.
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpiceConnectionInfoResponse {
    pub return_code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub host_ip: Option<String>,
    #[serde(default)]
    pub spice_port: Option<u16>,
    /// Already plain for SPICE.
    #[serde(default)]
    pub password: Option<String>,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
