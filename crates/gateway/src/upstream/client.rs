// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the upstream management API.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::GatewayError;
use crate::upstream::types::{
    check_return_code, LoginRequest, LoginResponse, SpiceConnectionInfoResponse,
    SpiceConnectionRequest, VmConnectionInfoResponse, VmPortResponse, VmRequest,
    VncPasswordResponse, VmSummary, RC_OK, RC_OK_PORT,
};

/// Successful login payload.
#[derive(Debug)]
pub struct LoginOk {
    pub token: String,
    pub vms: Vec<VmSummary>,
}

/// Resolved SPICE endpoint.
#[derive(Debug)]
pub struct SpiceInfo {
    pub host: String,
    pub port: u16,
    pub password: String,
}

/// Thin typed wrapper over the management REST endpoints.
#[derive(Clone)]
pub struct ManagementClient {
    base_url: String,
    client: Client,
}

impl ManagementClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { base_url: base_url.trim_end_matches('/').to_owned(), client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /login`
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOk, GatewayError> {
        let resp: LoginResponse =
            self.post_json("/login", &LoginRequest { username, password }).await?;
        check_return_code(resp.return_code, RC_OK, resp.message)?;
        let token = resp
            .token
            .ok_or_else(|| GatewayError::UpstreamDecode("login response missing token".to_owned()))?;
        Ok(LoginOk { token, vms: resp.vms.unwrap_or_default() })
    }

    /// `POST /vm-connection-info` — host address for a VM.
    pub async fn vm_connection_info(
        &self,
        token: &str,
        vm_id: &str,
    ) -> Result<String, GatewayError> {
        let resp: VmConnectionInfoResponse =
            self.post_json("/vm-connection-info", &VmRequest { token, vm_id }).await?;
        check_return_code(resp.return_code, RC_OK, resp.message)?;
        resp.host_ip
            .ok_or_else(|| GatewayError::UpstreamDecode("connection info missing hostIp".to_owned()))
    }

    /// `GET /vm-port` — display ports for a VM. This endpoint uses 0 as its
    /// OK code, unlike the rest of the API.
    pub async fn vm_port(&self, token: &str, vm_id: &str) -> Result<VmPortResponse, GatewayError> {
        let resp = self
            .client
            .get(self.url("/vm-port"))
            .query(&[("token", token), ("vmId", vm_id)])
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;
        let resp: VmPortResponse = Self::decode(resp).await?;
        check_return_code(resp.return_code, RC_OK_PORT, resp.message.clone())?;
        Ok(resp)
    }

    /// `POST /vnc-password` — one-shot base64-wrapped VNC password. Each
    /// call mints a new password upstream; callers must cache the result.
    pub async fn vnc_password(&self, token: &str, vm_id: &str) -> Result<String, GatewayError> {
        let resp: VncPasswordResponse =
            self.post_json("/vnc-password", &VmRequest { token, vm_id }).await?;
        check_return_code(resp.return_code, RC_OK, resp.message)?;
        resp.password
            .ok_or_else(|| GatewayError::UpstreamDecode("password response empty".to_owned()))
    }

    /// `POST /spice-connection-info` — host, port, and plain password.
    pub async fn spice_connection_info(
        &self,
        token: &str,
        vm_id: &str,
    ) -> Result<SpiceInfo, GatewayError> {
        let req = SpiceConnectionRequest { token, vm_id, rendering: serde_json::json!({}) };
        let resp: SpiceConnectionInfoResponse =
            self.post_json("/spice-connection-info", &req).await?;
        check_return_code(resp.return_code, RC_OK, resp.message)?;
        match (resp.host_ip, resp.spice_port, resp.password) {
            (Some(host), Some(port), Some(password)) => Ok(SpiceInfo { host, port, password }),
            _ => Err(GatewayError::UpstreamDecode("spice info incomplete".to_owned())),
        }
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, GatewayError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthenticated);
        }
        if status == StatusCode::FORBIDDEN {
            return Err(GatewayError::Forbidden);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::VmNotFound);
        }
        if !status.is_success() {
            return Err(GatewayError::UpstreamRejected {
                code: i64::from(status.as_u16()),
                message: format!("http status {status}"),
            });
        }
        resp.json().await.map_err(|e| GatewayError::UpstreamDecode(e.to_string()))
    }
}
