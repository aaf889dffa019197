// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authmux: authentication-session orchestrator for external CLI tools.

pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod flow;
pub mod monitor;
pub mod relay;
pub mod service;
pub mod session;
pub mod transfer;
pub mod transport;

#[cfg(test)]
mod test_support;

use std::sync::{Arc, Once};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AuthConfig;
use crate::service::AuthService;
use crate::transport::build_router;

static CRYPTO_INIT: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Run the orchestrator until SIGINT/SIGTERM.
///
/// On signal, in-flight sessions are cancelled before the HTTP server stops.
pub async fn run(config: AuthConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let service = Arc::new(AuthService::new(config)?);
    service.start();

    let stop = CancellationToken::new();
    {
        let service = Arc::clone(&service);
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => info!("received SIGTERM"),
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => info!("received SIGINT"),
            }
            service.shutdown().await;
            stop.cancel();
        });
    }

    let listener = TcpListener::bind(&addr).await?;
    info!("authmux listening on {}", listener.local_addr()?);
    let router = build_router(Arc::clone(&service));
    axum::serve(listener, router).with_graceful_shutdown(stop.cancelled_owned()).await?;

    // Server stopped without a signal (listener error path); still drain.
    service.shutdown().await;
    Ok(())
}
