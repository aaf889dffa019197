// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for unit tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;

use crate::events::NotificationHub;
use crate::flow::pkce::OAuthClient;
use crate::flow::FlowDeps;
use crate::relay::ExtensionRelay;
use crate::session::registry::SessionRegistry;
use crate::transfer::CredentialTransfer;

/// Mock OAuth token endpoint at `http://{addr}/token`.
pub struct MockTokenServer {
    pub addr: SocketAddr,
    pub calls: Arc<AtomicU32>,
    pub bodies: Arc<parking_lot::Mutex<Vec<serde_json::Value>>>,
}

impl MockTokenServer {
    pub fn token_url(&self) -> String {
        format!("http://{}/token", self.addr)
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

/// Serve canned `(status, body)` responses in order, repeating the last one.
pub async fn mock_token_server(responses: Vec<(u16, String)>) -> anyhow::Result<MockTokenServer> {
    slow_token_server(responses, Duration::ZERO).await
}

/// Like [`mock_token_server`], but each response is held back for `delay`.
pub async fn slow_token_server(
    responses: Vec<(u16, String)>,
    delay: Duration,
) -> anyhow::Result<MockTokenServer> {
    let calls = Arc::new(AtomicU32::new(0));
    let bodies = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let responses = Arc::new(responses);

    let app = {
        let calls = Arc::clone(&calls);
        let bodies = Arc::clone(&bodies);
        Router::new().route(
            "/token",
            post(move |body: String| {
                let calls = Arc::clone(&calls);
                let bodies = Arc::clone(&bodies);
                let responses = Arc::clone(&responses);
                async move {
                    let idx = calls.fetch_add(1, Ordering::Relaxed) as usize;
                    bodies.lock().push(serde_json::from_str(&body).unwrap_or_default());
                    tokio::time::sleep(delay).await;
                    let (status, body) = responses
                        .get(idx)
                        .or_else(|| responses.last())
                        .cloned()
                        .unwrap_or((500, "{}".to_owned()));
                    (
                        axum::http::StatusCode::from_u16(status)
                            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR),
                        body,
                    )
                }
            }),
        )
    };

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(MockTokenServer { addr, calls, bodies })
}

pub fn token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> String {
    let mut body = serde_json::json!({
        "access_token": access,
        "expires_in": expires_in,
        "token_type": "Bearer",
        "scope": "user:profile user:inference",
    });
    if let Some(rt) = refresh {
        body["refresh_token"] = serde_json::Value::String(rt.to_owned());
    }
    body.to_string()
}

pub fn oauth_client(token_url: &str) -> OAuthClient {
    OAuthClient {
        authorize_url: crate::config::CLAUDE_AUTHORIZE_URL.into(),
        token_url: token_url.into(),
        client_id: crate::config::CLAUDE_CLIENT_ID.into(),
        redirect_uri: crate::config::CLAUDE_REDIRECT_URI.into(),
        scope: crate::config::CLAUDE_SCOPES.into(),
    }
}

/// Collaborators wired against a temp home directory.
pub struct Harness {
    pub home: tempfile::TempDir,
    pub deps: FlowDeps,
}

pub fn harness() -> anyhow::Result<Harness> {
    crate::ensure_crypto_provider();
    let home = tempfile::tempdir()?;
    let hub = Arc::new(NotificationHub::new(256));
    let deps = FlowDeps {
        registry: Arc::new(SessionRegistry::new(Arc::clone(&hub), Duration::from_secs(600))),
        hub,
        transfer: Arc::new(CredentialTransfer::new(home.path())),
        relay: Arc::new(ExtensionRelay::new(16)),
        http: reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?,
    };
    Ok(Harness { home, deps })
}

/// Poll until `check` passes or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
