// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST surface specs: session lifecycle and the credential-stability
//! guarantee against the non-idempotent password endpoint.

use std::time::Duration;

use futures_util::SinkExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use vdimux_specs::{DisplayBehavior, MockUpstream, RecordingDisplay, TestGateway};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn get_json(url: String, token: &str) -> anyhow::Result<(u16, serde_json::Value)> {
    let resp = reqwest::Client::new().get(url).bearer_auth(token).send().await?;
    let status = resp.status().as_u16();
    Ok((status, resp.json().await.unwrap_or(serde_json::Value::Null)))
}

async fn post_json(url: String, token: &str) -> anyhow::Result<(u16, serde_json::Value)> {
    let resp = reqwest::Client::new().post(url).bearer_auth(token).send().await?;
    let status = resp.status().as_u16();
    Ok((status, resp.json().await.unwrap_or(serde_json::Value::Null)))
}

// -- Health -------------------------------------------------------------------

#[tokio::test]
async fn health_reports_running() -> anyhow::Result<()> {
    let upstream = MockUpstream::start().await?;
    let gateway = TestGateway::start(&upstream.base_url, |_| {}).await?;

    let health = gateway.health().await?;
    assert_eq!(health["status"], "running");
    assert_eq!(health["sessions"], 0);
    assert_eq!(health["connections"], 0);
    Ok(())
}

// -- Login / logout -----------------------------------------------------------

#[tokio::test]
async fn login_creates_session_with_inventory() -> anyhow::Result<()> {
    let upstream = MockUpstream::start().await?;
    let gateway = TestGateway::start(&upstream.base_url, |_| {}).await?;

    let resp: serde_json::Value = reqwest::Client::new()
        .post(format!("{}/api/login", gateway.base_url))
        .json(&serde_json::json!({ "username": "admin", "password": "pw" }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    assert!(resp["token"].as_str().is_some());
    let vms = resp["vms"].as_array().cloned().unwrap_or_default();
    assert_eq!(vms.len(), 2);
    assert_eq!(vms[0]["type"], "standalone");
    assert_eq!(vms[1]["type"], "pool");

    assert_eq!(gateway.health().await?["sessions"], 1);
    Ok(())
}

#[tokio::test]
async fn login_with_wrong_password_is_401() -> anyhow::Result<()> {
    let upstream = MockUpstream::start().await?;
    let gateway = TestGateway::start(&upstream.base_url, |_| {}).await?;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/login", gateway.base_url))
        .json(&serde_json::json!({ "username": "admin", "password": "wrong" }))
        .send()
        .await?;

    assert_eq!(resp.status().as_u16(), 401);
    let body: serde_json::Value = resp.json().await?;
    assert!(body["error"]["message"].as_str().is_some_and(|m| m.contains("5090")));
    Ok(())
}

#[tokio::test]
async fn logout_invalidates_the_session() -> anyhow::Result<()> {
    let upstream = MockUpstream::start().await?;
    let gateway = TestGateway::start(&upstream.base_url, |_| {}).await?;
    let token = gateway.login().await?;

    let (status, body) = post_json(format!("{}/api/logout", gateway.base_url), &token).await?;
    assert_eq!(status, 200);
    assert_eq!(body["removed"], true);

    // The bearer still verifies but its session is gone.
    let (status, _) = get_json(format!("{}/api/vms", gateway.base_url), &token).await?;
    assert_eq!(status, 401);
    assert_eq!(gateway.health().await?["sessions"], 0);
    Ok(())
}

#[tokio::test]
async fn missing_bearer_is_401() -> anyhow::Result<()> {
    let upstream = MockUpstream::start().await?;
    let gateway = TestGateway::start(&upstream.base_url, |_| {}).await?;

    let resp = reqwest::Client::new()
        .get(format!("{}/api/vms", gateway.base_url))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 401);
    Ok(())
}

// -- Refresh ------------------------------------------------------------------

#[tokio::test]
async fn refresh_rotates_the_id_but_keeps_the_payload() -> anyhow::Result<()> {
    let upstream = MockUpstream::start().await?;
    let gateway = TestGateway::start(&upstream.base_url, |_| {}).await?;
    let token = gateway.login().await?;

    let (_, before) = get_json(format!("{}/api/vms", gateway.base_url), &token).await?;

    let (status, refreshed) =
        post_json(format!("{}/api/refresh", gateway.base_url), &token).await?;
    assert_eq!(status, 200);
    let new_token = refreshed["token"].as_str().unwrap_or_default().to_owned();
    assert!(!new_token.is_empty());
    assert_ne!(new_token, token);

    // Old bearer points at a retired session; the new one sees the same
    // inventory.
    let (status, _) = get_json(format!("{}/api/vms", gateway.base_url), &token).await?;
    assert_eq!(status, 401);
    let (status, after) = get_json(format!("{}/api/vms", gateway.base_url), &new_token).await?;
    assert_eq!(status, 200);
    assert_eq!(before, after);
    assert_eq!(gateway.health().await?["sessions"], 1);
    Ok(())
}

// -- Credential stability (non-idempotent upstream) ---------------------------

#[tokio::test]
async fn connect_returns_the_same_password_every_time() -> anyhow::Result<()> {
    let upstream = MockUpstream::start().await?;
    let display = RecordingDisplay::start(DisplayBehavior::default()).await?;
    upstream.set_vnc_port(display.port);
    let gateway = TestGateway::start(&upstream.base_url, |_| {}).await?;
    let token = gateway.login().await?;

    let (_, first) =
        post_json(format!("{}/api/vnc/connect/v4", gateway.base_url), &token).await?;
    let (_, second) =
        post_json(format!("{}/api/vnc/connect/v4", gateway.base_url), &token).await?;

    // The upstream would have answered "p2" on the second call; the cache
    // returns the password the client already holds.
    assert_eq!(first["password"], "p1");
    assert_eq!(second["password"], "p1");
    assert_eq!(upstream.password_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn proxied_upgrade_reuses_the_cached_credentials() -> anyhow::Result<()> {
    let upstream = MockUpstream::start().await?;
    let display = RecordingDisplay::start(DisplayBehavior::default()).await?;
    upstream.set_vnc_port(display.port);
    let gateway = TestGateway::start(&upstream.base_url, |_| {}).await?;
    let token = gateway.login().await?;

    let (_, connect) =
        post_json(format!("{}/api/vnc/connect/v4", gateway.base_url), &token).await?;
    assert_eq!(connect["password"], "p1");
    assert_eq!(upstream.password_calls(), 1);

    // Opening the WebSocket with the user bearer resolves through the same
    // session cache: no second password mint.
    let url = format!("{}?token={token}", gateway.ws_url("/vnc/v4"));
    let (mut ws, _) = connect_async(url.as_str()).await?;
    gateway.wait_connections(1, TIMEOUT).await?;
    assert_eq!(upstream.password_calls(), 1);

    ws.send(Message::Binary(vec![0x01].into())).await?;
    ws.close(None).await?;
    gateway.wait_connections(0, TIMEOUT).await?;
    Ok(())
}

// -- Stats --------------------------------------------------------------------

#[tokio::test]
async fn stats_exposes_per_vm_counts() -> anyhow::Result<()> {
    let upstream = MockUpstream::start().await?;
    let display = RecordingDisplay::start(DisplayBehavior::default()).await?;
    upstream.set_spice_port(display.port);
    let gateway = TestGateway::start(&upstream.base_url, |_| {}).await?;
    let token = gateway.login().await?;

    let url = format!("{}?token={token}", gateway.ws_url("/spice/v2"));
    let (_ws, _) = connect_async(url.as_str()).await?;
    gateway.wait_connections(1, TIMEOUT).await?;

    let (status, stats) = get_json(format!("{}/api/stats", gateway.base_url), &token).await?;
    assert_eq!(status, 200);
    assert_eq!(stats["connections"], 1);
    assert_eq!(stats["by_vm"]["v2"], 1);
    let records = stats["records"].as_array().cloned().unwrap_or_default();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["protocol"], "spice");
    Ok(())
}
