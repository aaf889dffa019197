// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the auth orchestrator.

pub mod auth;
pub mod extension;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::AuthService;

/// Build the axum `Router` with all orchestrator routes.
pub fn build_router(service: Arc<AuthService>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/health", get(http::health))
        // Session lifecycle
        .route("/sessions", post(http::create_session).get(http::list_sessions))
        .route("/sessions/{id}", get(http::get_session))
        .route("/sessions/{id}/submit-code", post(http::submit_code))
        .route("/sessions/{id}/cancel", post(http::cancel_session))
        // Credentials
        .route("/auth/status", get(http::auth_status))
        .route("/credentials/sync", post(http::sync_credentials))
        // WebSocket (token via query)
        .route("/ws/events", get(ws::events_handler))
        .route("/ws/extension", get(extension::extension_handler))
        // Middleware
        .layer(middleware::from_fn_with_state(Arc::clone(&service), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}
