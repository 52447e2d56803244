// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic ping-pong liveness sweep over all proxied connections.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::registry::ControlMsg;
use crate::state::GatewayState;

/// Spawn the single background heartbeat task.
pub fn spawn_heartbeat(state: Arc<GatewayState>) {
    let interval = state.config.heartbeat_interval();

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            sweep(&state).await;
        }
    });
}

/// One sweep: a connection that never answered the previous ping is
/// terminated; everyone else gets their flag cleared and a fresh ping.
async fn sweep(state: &GatewayState) {
    for record in state.registry.records().await {
        if record.cancel.is_cancelled() {
            continue;
        }

        if !record.is_alive.load(Ordering::Relaxed) {
            tracing::info!(
                connection_id = %record.id,
                vm_id = %record.vm_id,
                "heartbeat: terminating unresponsive client"
            );
            record.cancel.cancel();
            continue;
        }

        record.is_alive.store(false, Ordering::Relaxed);
        let _ = record.control.send(ControlMsg::Ping);
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
