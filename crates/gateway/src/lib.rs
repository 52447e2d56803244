// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! vdimux: WebSocket-to-TCP gateway multiplexing browser display clients
//! onto upstream VNC and SPICE servers.

pub mod config;
pub mod credential;
pub mod error;
pub mod proxy;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod state;
pub mod transport;
pub mod upstream;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::error::CLOSE_GOING_AWAY;
use crate::proxy::heartbeat::spawn_heartbeat;
use crate::state::GatewayState;
use crate::transport::build_router;

/// Run the gateway until a termination signal, then drain.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let grace = config.shutdown_grace();

    let state = Arc::new(GatewayState::new(config, shutdown.clone()));
    spawn_signal_listener(shutdown.clone());
    spawn_heartbeat(Arc::clone(&state));
    spawn_drain(Arc::clone(&state), shutdown.clone());

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("vdimux listening on {addr}");

    let serve = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    // Hard deadline: if draining stalls past the grace period, exit anyway.
    tokio::select! {
        res = serve => res?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!("shutdown grace deadline exceeded, forcing exit");
        }
    }

    Ok(())
}

/// Cancel the shutdown token on SIGINT or SIGTERM.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let term = async {
            #[cfg(unix)]
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut term) => {
                    term.recv().await;
                }
                Err(e) => {
                    tracing::warn!(err = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
            #[cfg(not(unix))]
            std::future::pending::<()>().await;
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term => {}
        }
        tracing::info!("termination signal received");
        shutdown.cancel();
    });
}

/// On shutdown: close every active session with 1001 and clear the session
/// store while the server finishes draining.
fn spawn_drain(state: Arc<GatewayState>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        shutdown.cancelled().await;
        let active = state.registry.count();
        if active > 0 {
            tracing::info!(active, "shutdown: closing active connections");
        }
        state.registry.close_all(CLOSE_GOING_AWAY, "server going away").await;
        state.sessions.clear().await;
    });
}
