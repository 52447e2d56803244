// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the vdimux gateway.
#[derive(Debug, Clone, clap::Parser)]
pub struct GatewayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "VDIMUX_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9400, env = "VDIMUX_PORT")]
    pub port: u16,

    /// Base URL of the upstream management API.
    #[arg(long, env = "VDIMUX_UPSTREAM_URL")]
    pub upstream_url: String,

    /// HMAC secret for signing and verifying bearer tokens.
    #[arg(long, env = "VDIMUX_TOKEN_SECRET")]
    pub token_secret: String,

    /// Global cap on concurrent proxied connections.
    #[arg(long, default_value_t = 100, env = "VDIMUX_GLOBAL_MAX")]
    pub global_max: usize,

    /// Per-VM cap on concurrent proxied connections. Must stay >= 17 so a
    /// full SPICE channel set (display, inputs, cursor, playback, record,
    /// usbredir, ...) fits on one VM.
    #[arg(long, default_value_t = 20, env = "VDIMUX_PER_VM_MAX")]
    pub per_vm_max: usize,

    /// Upstream TCP dial deadline in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "VDIMUX_CONNECTION_TIMEOUT_MS")]
    pub connection_timeout_ms: u64,

    /// Max dial retries after the first attempt.
    #[arg(long, default_value_t = 3, env = "VDIMUX_MAX_RETRIES")]
    pub max_retries: u32,

    /// Base delay between dial attempts in milliseconds.
    #[arg(long, default_value_t = 1_000, env = "VDIMUX_RETRY_DELAY_MS")]
    pub retry_delay_ms: u64,

    /// Multiplier applied to the retry delay after each failed attempt.
    #[arg(long, default_value_t = 2.0, env = "VDIMUX_RETRY_BACKOFF")]
    pub retry_backoff: f64,

    /// Heartbeat sweep interval in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "VDIMUX_HEARTBEAT_MS")]
    pub heartbeat_ms: u64,

    /// Enable TCP keepalive on upstream sockets.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "VDIMUX_TCP_KEEPALIVE")]
    pub tcp_keepalive: bool,

    /// Initial TCP keepalive delay in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "VDIMUX_TCP_KEEPALIVE_DELAY_MS")]
    pub tcp_keepalive_delay_ms: u64,

    /// Upper bound in bytes on frames buffered before the upstream dial
    /// completes. Overflow closes the connection.
    #[arg(long, default_value_t = 1_048_576, env = "VDIMUX_BUFFER_MAX_BYTES")]
    pub buffer_max_bytes: usize,

    /// Forward text frames that fail to parse as JSON control messages to
    /// the upstream verbatim (legacy client behaviour).
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "VDIMUX_TEXT_FALLBACK")]
    pub text_fallback: bool,

    /// Lifetime of user bearer tokens in seconds.
    #[arg(long, default_value_t = 86_400, env = "VDIMUX_SESSION_TTL_SECS")]
    pub session_ttl_secs: u64,

    /// Lifetime of per-VM display bearer tokens in seconds.
    #[arg(long, default_value_t = 3_600, env = "VDIMUX_DISPLAY_TTL_SECS")]
    pub display_ttl_secs: u64,

    /// Hard deadline for graceful shutdown in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "VDIMUX_SHUTDOWN_GRACE_MS")]
    pub shutdown_grace_ms: u64,
}

impl GatewayConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn tcp_keepalive_delay(&self) -> Duration {
        Duration::from_millis(self.tcp_keepalive_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
