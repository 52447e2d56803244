// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry and admission control.
//!
//! Two maps: connection-id -> record, and vm-id -> set of connection-ids.
//! A slot is reserved in `admit` before the upstream dial starts, so
//! concurrent slow dials cannot overshoot the caps; a failed dial releases
//! the reservation through the same idempotent `unregister`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::state::epoch_ms;

/// Display protocol spoken by the upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vnc,
    Spice,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vnc => "vnc",
            Self::Spice => "spice",
        }
    }
}

/// Out-of-band commands delivered to a splice loop.
#[derive(Debug, Clone)]
pub enum ControlMsg {
    /// Send a WebSocket ping (heartbeat sweep).
    Ping,
    /// Close the WebSocket with the given code, half-close TCP, and stop.
    Close { code: u16, reason: &'static str },
}

/// Live proxied connection. Exists iff both sockets are live.
pub struct ConnectionRecord {
    pub id: String,
    pub vm_id: String,
    pub protocol: Protocol,
    pub upstream_addr: String,
    pub client_addr: String,
    pub started_at: Instant,
    pub last_activity: AtomicU64,
    pub is_alive: AtomicBool,
    pub cancel: CancellationToken,
    pub control: mpsc::UnboundedSender<ControlMsg>,
}

impl ConnectionRecord {
    /// Record activity on either direction of the splice.
    pub fn touch(&self) {
        self.last_activity.store(epoch_ms(), Ordering::Relaxed);
    }

    /// A pong arrived; the client is alive.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        self.touch();
    }
}

/// Point-in-time view of one connection, for the stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: String,
    pub vm_id: String,
    pub protocol: Protocol,
    pub upstream_addr: String,
    pub client_addr: String,
    pub uptime_secs: u64,
    pub last_activity_ms: u64,
}

/// Global connection registry with per-VM index and caps.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<ConnectionRecord>>>,
    by_vm: RwLock<HashMap<String, HashSet<String>>>,
    total: AtomicUsize,
    next_seq: AtomicU64,
    global_max: usize,
    per_vm_max: usize,
}

impl ConnectionRegistry {
    pub fn new(global_max: usize, per_vm_max: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            by_vm: RwLock::new(HashMap::new()),
            total: AtomicUsize::new(0),
            next_seq: AtomicU64::new(1),
            global_max,
            per_vm_max,
        }
    }

    /// Check both caps (global first) and reserve a slot. Returns the new
    /// connection id, `{vm}_{seq}_{ms}`; uniqueness comes from the counter,
    /// the timestamp is for humans reading logs.
    pub async fn admit(&self, vm_id: &str) -> Result<String, GatewayError> {
        let mut by_vm = self.by_vm.write().await;

        if self.total.load(Ordering::Relaxed) >= self.global_max {
            return Err(GatewayError::GlobalCapExceeded);
        }
        let slots = by_vm.entry(vm_id.to_owned()).or_default();
        if slots.len() >= self.per_vm_max {
            return Err(GatewayError::VmCapExceeded);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{vm_id}_{seq}_{}", epoch_ms());
        slots.insert(id.clone());
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Attach the record to a previously admitted id.
    pub async fn register(&self, record: Arc<ConnectionRecord>) {
        self.connections.write().await.insert(record.id.clone(), record);
    }

    /// Drop a connection (or an unregistered reservation) from both maps.
    /// Idempotent: the second call for the same id is a no-op and returns
    /// false. Empty per-VM sets are removed.
    pub async fn unregister(&self, vm_id: &str, id: &str) -> bool {
        let mut by_vm = self.by_vm.write().await;
        let released = match by_vm.get_mut(vm_id) {
            Some(slots) => {
                let removed = slots.remove(id);
                if slots.is_empty() {
                    by_vm.remove(vm_id);
                }
                removed
            }
            None => false,
        };
        drop(by_vm);

        self.connections.write().await.remove(id);
        if released {
            self.total.fetch_sub(1, Ordering::Relaxed);
        }
        released
    }

    pub fn count(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub async fn count_by_vm(&self, vm_id: &str) -> usize {
        self.by_vm.read().await.get(vm_id).map(HashSet::len).unwrap_or(0)
    }

    /// Snapshot of the live records, for sweeps.
    pub async fn records(&self) -> Vec<Arc<ConnectionRecord>> {
        self.connections.read().await.values().map(Arc::clone).collect()
    }

    /// Per-connection summaries plus per-VM counts.
    pub async fn snapshot(&self) -> Vec<ConnectionSummary> {
        self.connections
            .read()
            .await
            .values()
            .map(|r| ConnectionSummary {
                id: r.id.clone(),
                vm_id: r.vm_id.clone(),
                protocol: r.protocol,
                upstream_addr: r.upstream_addr.clone(),
                client_addr: r.client_addr.clone(),
                uptime_secs: r.started_at.elapsed().as_secs(),
                last_activity_ms: r.last_activity.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Ask every connection on a VM to close.
    pub async fn close_all_by_vm(&self, vm_id: &str, code: u16, reason: &'static str) {
        for record in self.records().await {
            if record.vm_id == vm_id {
                let _ = record.control.send(ControlMsg::Close { code, reason });
            }
        }
    }

    /// Ask every connection to close (process shutdown).
    pub async fn close_all(&self, code: u16, reason: &'static str) {
        for record in self.records().await {
            let _ = record.control.send(ControlMsg::Close { code, reason });
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
