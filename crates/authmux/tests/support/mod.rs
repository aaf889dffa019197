// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;

use authmux::config::AuthConfig;
use authmux::service::AuthService;

pub const DEVICE_PROMPT: &str =
    "echo 'To sign in, visit https://example.com and enter code ABC-123'; exec sleep 30";

/// Config rooted at a temp home, with device commands that print a prompt and
/// wait.
pub fn test_config(home: &tempfile::TempDir) -> AuthConfig {
    let mut config = AuthConfig::test();
    config.home_dir = Some(home.path().to_path_buf());
    config.azure_command = DEVICE_PROMPT.to_owned();
    config.gcloud_command = DEVICE_PROMPT.to_owned();
    config
}

pub fn service(config: AuthConfig) -> anyhow::Result<Arc<AuthService>> {
    Ok(Arc::new(AuthService::new(config)?))
}

/// Token endpoint that always answers with a fresh token pair.
pub async fn spawn_token_server() -> anyhow::Result<SocketAddr> {
    let app = Router::new().route(
        "/token",
        post(|| async {
            axum::Json(serde_json::json!({
                "access_token": "sk-ant-test",
                "refresh_token": "rt-test",
                "expires_in": 3600,
                "token_type": "Bearer",
            }))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(addr)
}

/// Serve the full router on an ephemeral port.
pub async fn spawn_http_server(service: Arc<AuthService>) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let router = authmux::transport::build_router(service);
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    Ok(addr)
}
