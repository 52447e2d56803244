// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::credential::TokenVerifier;
use crate::registry::ConnectionRegistry;
use crate::resolver::TargetResolver;
use crate::session::SessionStore;
use crate::upstream::client::ManagementClient;

/// Shared gateway state. Constructed once in `run` and passed by reference
/// into the router; nothing here is a global.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub shutdown: CancellationToken,
    pub sessions: SessionStore,
    pub registry: ConnectionRegistry,
    pub resolver: TargetResolver,
    pub verifier: TokenVerifier,
    pub upstream: ManagementClient,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, shutdown: CancellationToken) -> Self {
        let upstream = ManagementClient::new(config.upstream_url.clone());
        Self {
            shutdown,
            sessions: SessionStore::new(),
            registry: ConnectionRegistry::new(config.global_max, config.per_vm_max),
            resolver: TargetResolver::new(upstream.clone()),
            verifier: TokenVerifier::new(&config.token_secret),
            upstream,
            config,
        }
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
