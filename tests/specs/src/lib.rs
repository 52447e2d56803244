// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end harness: boots the real gateway router on an ephemeral port,
//! a mock management API, and fake display servers speaking raw TCP.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use vdimux::config::GatewayConfig;
use vdimux::proxy::heartbeat::spawn_heartbeat;
use vdimux::state::GatewayState;
use vdimux::transport::build_router;

pub const SPEC_SECRET: &str = "spec-secret";

// -- Gateway under test -------------------------------------------------------

pub struct TestGateway {
    pub base_url: String,
    pub state: Arc<GatewayState>,
    shutdown: CancellationToken,
}

impl TestGateway {
    /// Boot the gateway against `upstream_url`, applying `tweak` to the
    /// default configuration first.
    pub async fn start(
        upstream_url: &str,
        tweak: impl FnOnce(&mut GatewayConfig),
    ) -> anyhow::Result<Self> {
        let mut config = GatewayConfig::parse_from([
            "vdimux",
            "--upstream-url",
            upstream_url,
            "--token-secret",
            SPEC_SECRET,
        ]);
        tweak(&mut config);

        let shutdown = CancellationToken::new();
        let state = Arc::new(GatewayState::new(config, shutdown.clone()));
        spawn_heartbeat(Arc::clone(&state));

        let router = build_router(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let serve = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
        tokio::spawn(async move {
            let _ = serve.await;
        });

        Ok(Self { base_url: format!("http://{addr}"), state, shutdown })
    }

    /// WebSocket URL for a gateway path.
    pub fn ws_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.replacen("http://", "ws://", 1))
    }

    /// Log in with fixed test credentials and return the user bearer.
    pub async fn login(&self) -> anyhow::Result<String> {
        let resp: serde_json::Value = reqwest::Client::new()
            .post(format!("{}/api/login", self.base_url))
            .json(&serde_json::json!({ "username": "admin", "password": "pw" }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        resp["token"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("login response missing token"))
    }

    /// Current `/health` payload.
    pub async fn health(&self) -> anyhow::Result<serde_json::Value> {
        Ok(reqwest::get(format!("{}/health", self.base_url)).await?.json().await?)
    }

    /// Poll `/health` until `connections` equals `expected` or the deadline
    /// passes.
    pub async fn wait_connections(
        &self,
        expected: u64,
        deadline: std::time::Duration,
    ) -> anyhow::Result<()> {
        let until = tokio::time::Instant::now() + deadline;
        loop {
            if self.health().await?["connections"].as_u64() == Some(expected) {
                return Ok(());
            }
            if tokio::time::Instant::now() > until {
                anyhow::bail!("never reached {expected} connections");
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// -- Mock management API ------------------------------------------------------

pub struct MockUpstreamState {
    pub vnc_port: AtomicU32,
    pub spice_port: AtomicU32,
    /// Counts `/vnc-password` calls; each call mints a new password
    /// `p{n}`, modelling the non-idempotent production API.
    pub password_calls: AtomicU32,
}

pub struct MockUpstream {
    pub base_url: String,
    pub state: Arc<MockUpstreamState>,
}

impl MockUpstream {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(MockUpstreamState {
            vnc_port: AtomicU32::new(0),
            spice_port: AtomicU32::new(0),
            password_calls: AtomicU32::new(0),
        });

        let router = Router::new()
            .route("/login", post(mock_login))
            .route("/vm-connection-info", post(mock_connection_info))
            .route("/vm-port", get(mock_vm_port))
            .route("/vnc-password", post(mock_vnc_password))
            .route("/spice-connection-info", post(mock_spice_info))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self { base_url: format!("http://{addr}"), state })
    }

    pub fn set_vnc_port(&self, port: u16) {
        self.state.vnc_port.store(u32::from(port), Ordering::Relaxed);
    }

    pub fn set_spice_port(&self, port: u16) {
        self.state.spice_port.store(u32::from(port), Ordering::Relaxed);
    }

    pub fn password_calls(&self) -> u32 {
        self.state.password_calls.load(Ordering::Relaxed)
    }
}

async fn mock_login(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    if body["password"] == "wrong" {
        return Json(serde_json::json!({ "returnCode": 5090, "message": "wrong password" }));
    }
    Json(serde_json::json!({
        "returnCode": 200,
        "token": "upstream-tok",
        "vms": [
            { "id": "v1", "name": "dev box", "status": "running", "type": "standalone" },
            { "id": "v2", "name": "pool seat", "status": "running", "type": "pool" }
        ]
    }))
}

async fn mock_connection_info(Json(_body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "returnCode": 200, "hostIp": "127.0.0.1" }))
}

async fn mock_vm_port(
    State(s): State<Arc<MockUpstreamState>>,
    Query(_q): Query<std::collections::HashMap<String, String>>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "returnCode": 0,
        "vncPort": s.vnc_port.load(Ordering::Relaxed),
        "spicePort": s.spice_port.load(Ordering::Relaxed)
    }))
}

async fn mock_vnc_password(
    State(s): State<Arc<MockUpstreamState>>,
    Json(_body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let n = s.password_calls.fetch_add(1, Ordering::Relaxed) + 1;
    let wrapped = base64::engine::general_purpose::STANDARD.encode(format!("p{n}"));
    Json(serde_json::json!({ "returnCode": 200, "password": wrapped }))
}

async fn mock_spice_info(
    State(s): State<Arc<MockUpstreamState>>,
    Json(_body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "returnCode": 200,
        "hostIp": "127.0.0.1",
        "spicePort": s.spice_port.load(Ordering::Relaxed),
        "password": "spice-pw"
    }))
}

// -- Fake display server ------------------------------------------------------

#[derive(Default, Clone)]
pub struct DisplayBehavior {
    /// Bytes written back after the first read returns data.
    pub reply: Option<Vec<u8>>,
    /// Close the connection right after replying.
    pub close_after_reply: bool,
}

/// Raw-TCP stand-in for a VNC/SPICE server: records every byte it receives.
pub struct RecordingDisplay {
    pub port: u16,
    pub received: Arc<Mutex<Vec<u8>>>,
    pub accepted: Arc<AtomicUsize>,
    pub eofs: Arc<AtomicUsize>,
}

impl RecordingDisplay {
    pub async fn start(behavior: DisplayBehavior) -> anyhow::Result<Self> {
        Self::start_on(0, behavior).await
    }

    /// Bind a specific port (0 for ephemeral). Late binding lets tests
    /// exercise the gateway's dial retry while the client is already
    /// streaming frames.
    pub async fn start_on(port: u16, behavior: DisplayBehavior) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let port = listener.local_addr()?.port();
        let received: Arc<Mutex<Vec<u8>>> = Arc::default();
        let accepted: Arc<AtomicUsize> = Arc::default();
        let eofs: Arc<AtomicUsize> = Arc::default();

        {
            let received = Arc::clone(&received);
            let accepted = Arc::clone(&accepted);
            let eofs = Arc::clone(&eofs);
            tokio::spawn(async move {
                loop {
                    let Ok((mut stream, _)) = listener.accept().await else { break };
                    accepted.fetch_add(1, Ordering::Relaxed);
                    let received = Arc::clone(&received);
                    let eofs = Arc::clone(&eofs);
                    let behavior = behavior.clone();
                    tokio::spawn(async move {
                        let mut replied = false;
                        let mut buf = [0u8; 8192];
                        loop {
                            match stream.read(&mut buf).await {
                                Ok(0) => {
                                    eofs.fetch_add(1, Ordering::Relaxed);
                                    break;
                                }
                                Ok(n) => {
                                    received.lock().await.extend_from_slice(&buf[..n]);
                                    if !replied {
                                        replied = true;
                                        if let Some(ref reply) = behavior.reply {
                                            if stream.write_all(reply).await.is_err() {
                                                break;
                                            }
                                            if behavior.close_after_reply {
                                                break;
                                            }
                                        }
                                    }
                                }
                                Err(_) => break,
                            }
                        }
                    });
                }
            });
        }

        Ok(Self { port, received, accepted, eofs })
    }

    pub async fn received_bytes(&self) -> Vec<u8> {
        self.received.lock().await.clone()
    }
}

/// Reserve an ephemeral port by binding and immediately dropping it.
pub async fn reserve_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}
