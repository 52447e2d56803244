// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process session store: session-id -> upstream token, VM inventory,
//! per-VM connection-info cache.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One VM from the inventory snapshot taken at login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInfo {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: VmKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmKind {
    Standalone,
    Pool,
}

/// Resolved display-server endpoint plus the password handed to the client.
///
/// The password stored here is the one the browser SDK received. The
/// management API returns a different password on every call, so a cached
/// tuple must be returned verbatim for the lifetime of the session.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub cached_at: u64,
}

/// A logged-in session. Owns its per-VM credential cache exclusively.
pub struct Session {
    pub id: String,
    /// Long-lived credential for the management API. Never sent to the browser.
    pub upstream_token: String,
    pub vms: Vec<VmInfo>,
    creds: RwLock<HashMap<String, ConnectionInfo>>,
}

impl Session {
    pub fn new(id: String, upstream_token: String, vms: Vec<VmInfo>) -> Self {
        Self { id, upstream_token, vms, creds: RwLock::new(HashMap::new()) }
    }

    /// Return the cached connection info for a VM, if any.
    pub async fn cached_info(&self, vm_id: &str) -> Option<ConnectionInfo> {
        self.creds.read().await.get(vm_id).cloned()
    }

    /// Fill the cache for a VM. First writer wins: if another resolve raced
    /// us and already cached a tuple, that tuple is returned and `info` is
    /// discarded, keeping the password stable.
    pub async fn fill_info(&self, vm_id: &str, info: ConnectionInfo) -> ConnectionInfo {
        let mut creds = self.creds.write().await;
        creds.entry(vm_id.to_owned()).or_insert(info).clone()
    }

    async fn creds_snapshot(&self) -> HashMap<String, ConnectionInfo> {
        self.creds.read().await.clone()
    }
}

/// Shared session map. A single process is authoritative; nothing persists.
pub struct SessionStore {
    inner: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }

    pub async fn put(&self, session: Arc<Session>) {
        self.inner.write().await.insert(session.id.clone(), session);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.read().await.get(id).map(Arc::clone)
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.write().await.remove(id)
    }

    /// Atomically retire `old_id` and insert a session under `new_id` with
    /// the same payload, including the credential cache. Returns the new
    /// session, or `None` when `old_id` was not present.
    pub async fn replace(&self, old_id: &str, new_id: String) -> Option<Arc<Session>> {
        let mut inner = self.inner.write().await;
        let old = inner.remove(old_id)?;
        let creds = old.creds_snapshot().await;
        let fresh = Arc::new(Session {
            id: new_id.clone(),
            upstream_token: old.upstream_token.clone(),
            vms: old.vms.clone(),
            creds: RwLock::new(creds),
        });
        inner.insert(new_id, Arc::clone(&fresh));
        Some(fresh)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
