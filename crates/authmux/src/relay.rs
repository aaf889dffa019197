// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message contract with the browser extension.
//!
//! Server to extension: `auth_url {sessionId, url, codeVerifier}` and
//! `ack {sessionId, ok, message}`. Extension to server: `auth_code
//! {sessionId, code}` and `auth_tokens {sessionId, tokens}`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::flow::TokenBundle;

/// Server-to-extension frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayOutbound {
    #[serde(rename_all = "camelCase")]
    AuthUrl { session_id: String, url: String, code_verifier: String },
    #[serde(rename_all = "camelCase")]
    Ack { session_id: String, ok: bool, message: String },
}

impl RelayOutbound {
    pub fn session_id(&self) -> &str {
        match self {
            Self::AuthUrl { session_id, .. } | Self::Ack { session_id, .. } => session_id,
        }
    }
}

/// Extension-to-server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayInbound {
    #[serde(rename_all = "camelCase")]
    AuthCode { session_id: String, code: String },
    #[serde(rename_all = "camelCase")]
    AuthTokens { session_id: String, tokens: TokenBundle },
}

impl RelayInbound {
    pub fn session_id(&self) -> &str {
        match self {
            Self::AuthCode { session_id, .. } | Self::AuthTokens { session_id, .. } => session_id,
        }
    }
}

/// Outbound side of the extension channel.
///
/// Every `auth_url` is broadcast to connected extensions and also kept until
/// the session leaves `awaiting_browser`, so an extension that connects late
/// still sees it.
pub struct ExtensionRelay {
    tx: broadcast::Sender<RelayOutbound>,
    pending: Mutex<Vec<RelayOutbound>>,
}

impl ExtensionRelay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, pending: Mutex::new(Vec::new()) }
    }

    pub fn push_auth_url(&self, session_id: &str, url: &str, code_verifier: &str) {
        let msg = RelayOutbound::AuthUrl {
            session_id: session_id.to_owned(),
            url: url.to_owned(),
            code_verifier: code_verifier.to_owned(),
        };
        {
            let mut pending = self.pending.lock();
            pending.retain(|m| m.session_id() != session_id);
            pending.push(msg.clone());
        }
        let delivered = self.tx.send(msg).unwrap_or(0);
        tracing::debug!(session_id, delivered, "auth_url relayed");
    }

    /// Stop replaying a session's `auth_url`. Returns whether one was pending.
    pub fn resolve(&self, session_id: &str) -> bool {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|m| m.session_id() != session_id);
        pending.len() != before
    }

    /// Snapshot of unresolved `auth_url` frames, oldest first.
    pub fn pending(&self) -> Vec<RelayOutbound> {
        self.pending.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayOutbound> {
        self.tx.subscribe()
    }

    /// Number of connected extensions.
    pub fn connected(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;
