// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Target resolution: (credential, vm, protocol) -> (host, port, password).
//!
//! The management API mints a fresh password on every lookup, so for
//! session-backed resolves the per-VM cache is authoritative: a hit returns
//! the cached tuple verbatim and the upstream is not consulted again.

use std::sync::Arc;

use base64::Engine as _;

use crate::error::GatewayError;
use crate::registry::Protocol;
use crate::session::{ConnectionInfo, Session};
use crate::state::epoch_ms;
use crate::upstream::client::ManagementClient;

/// Where the resolve gets its upstream credential from.
pub enum ResolveSource<'a> {
    /// A live session; consult and fill its credential cache.
    Session(&'a Arc<Session>),
    /// A display bearer embedding the upstream token; always query fresh.
    Display { upstream_token: &'a str },
}

pub struct TargetResolver {
    client: ManagementClient,
}

impl TargetResolver {
    pub fn new(client: ManagementClient) -> Self {
        Self { client }
    }

    pub async fn resolve(
        &self,
        source: ResolveSource<'_>,
        vm_id: &str,
        protocol: Protocol,
    ) -> Result<ConnectionInfo, GatewayError> {
        match source {
            ResolveSource::Display { upstream_token } => {
                self.fetch(upstream_token, vm_id, protocol).await
            }
            ResolveSource::Session(session) => {
                if let Some(info) = session.cached_info(vm_id).await {
                    tracing::debug!(vm_id, session_id = %session.id, "connection info cache hit");
                    return Ok(info);
                }
                let info = self.fetch(&session.upstream_token, vm_id, protocol).await?;
                Ok(session.fill_info(vm_id, info).await)
            }
        }
    }

    async fn fetch(
        &self,
        token: &str,
        vm_id: &str,
        protocol: Protocol,
    ) -> Result<ConnectionInfo, GatewayError> {
        match protocol {
            Protocol::Vnc => {
                let host = self.client.vm_connection_info(token, vm_id).await?;
                let ports = self.client.vm_port(token, vm_id).await?;
                let port = ports
                    .vnc_port
                    .ok_or_else(|| GatewayError::UpstreamDecode("no vnc port".to_owned()))?;
                let wrapped = self.client.vnc_password(token, vm_id).await?;
                let password = decode_password(&wrapped)?;
                Ok(ConnectionInfo { host, port, password, cached_at: epoch_ms() })
            }
            Protocol::Spice => {
                let info = self.client.spice_connection_info(token, vm_id).await?;
                Ok(ConnectionInfo {
                    host: info.host,
                    port: info.port,
                    password: info.password,
                    cached_at: epoch_ms(),
                })
            }
        }
    }
}

/// Unwrap the upstream's base64 envelope around a VNC password. Happens
/// exactly once, before the value enters the cache.
fn decode_password(wrapped: &str) -> Result<String, GatewayError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(wrapped.trim())
        .map_err(|e| GatewayError::UpstreamDecode(format!("bad password encoding: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| GatewayError::UpstreamDecode(format!("password not utf-8: {e}")))
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
