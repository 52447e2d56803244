// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the gateway.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::GatewayState;

/// Build the axum `Router` with all gateway routes.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/health", get(http::health))
        // Session lifecycle
        .route("/api/login", post(http::login))
        .route("/api/logout", post(http::logout))
        .route("/api/refresh", post(http::refresh))
        // Inventory and connection info
        .route("/api/vms", get(http::list_vms))
        .route("/api/vnc/connect/{vm_id}", post(http::vnc_connect))
        .route("/api/spice/connect/{vm_id}", post(http::spice_connect))
        .route("/api/stats", get(http::stats))
        // Proxied displays
        .route("/vnc/{vm_id}", get(ws::vnc_handler))
        .route("/spice/{vm_id}", get(ws::spice_handler))
        // Unmatched paths: WS upgrades close with 1002, HTTP gets 404.
        .fallback(ws::fallback)
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
