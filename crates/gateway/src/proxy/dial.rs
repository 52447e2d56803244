// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP dialing with bounded retries and exponential backoff.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// Dial `host:port` with up to `max_retries + 1` attempts. After each
/// failure sleep `retry_delay * backoff^(attempt-1)`. A successful socket
/// has no further deadline: keepalive plus the heartbeat detect death.
pub async fn dial(config: &GatewayConfig, host: &str, port: u16) -> Result<TcpStream, GatewayError> {
    let addr = format!("{host}:{port}");
    let attempts = config.max_retries + 1;
    let mut last_err = String::new();

    for attempt in 1..=attempts {
        match tokio::time::timeout(config.connection_timeout(), TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                apply_socket_options(config, &stream);
                tracing::debug!(%addr, attempt, "upstream TCP connected");
                return Ok(stream);
            }
            Ok(Err(e)) => last_err = e.to_string(),
            Err(_) => {
                last_err = format!("connect timed out after {}ms", config.connection_timeout_ms)
            }
        }

        tracing::debug!(%addr, attempt, err = %last_err, "upstream TCP connect failed");
        if attempt < attempts {
            tokio::time::sleep(backoff_delay(
                config.retry_delay(),
                config.retry_backoff,
                attempt,
            ))
            .await;
        }
    }

    Err(GatewayError::DialFailed(last_err))
}

/// Delay before the attempt following failed attempt number `attempt`
/// (1-based): `base * multiplier^(attempt-1)`.
fn backoff_delay(base: Duration, multiplier: f64, attempt: u32) -> Duration {
    base.mul_f64(multiplier.powi(attempt.saturating_sub(1) as i32))
}

/// Low-latency interactive stream: no Nagle, keepalive with a long initial
/// delay so idle desktop sessions survive NAT timeouts.
fn apply_socket_options(config: &GatewayConfig, stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    if config.tcp_keepalive {
        let sock = socket2::SockRef::from(stream);
        let keepalive = socket2::TcpKeepalive::new().with_time(config.tcp_keepalive_delay());
        let _ = sock.set_tcp_keepalive(&keepalive);
    }
}

#[cfg(test)]
#[path = "dial_tests.rs"]
mod tests;
