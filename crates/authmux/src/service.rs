// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The orchestrator: one explicitly constructed service owning the registry,
//! the flow drivers, and the background monitor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AuthConfig;
use crate::credential::{probe_status, ToolAuthStatus};
use crate::error::AuthError;
use crate::events::NotificationHub;
use crate::flow::{FlowDeps, FlowDriver, FlowDrivers, TokenBundle};
use crate::monitor::ExpiryMonitor;
use crate::relay::{ExtensionRelay, RelayInbound, RelayOutbound};
use crate::session::registry::SessionRegistry;
use crate::session::{epoch_ms, AuthSession, Tool};
use crate::transfer::{CredentialTransfer, RemoteTarget, SyncDirection, TransferResult};

/// Message recorded on sessions cancelled by [`AuthService::shutdown`].
pub const SHUTDOWN_MESSAGE: &str = "server shutting down";

/// Authentication session orchestrator.
pub struct AuthService {
    pub config: AuthConfig,
    pub registry: Arc<SessionRegistry>,
    pub hub: Arc<NotificationHub>,
    pub transfer: Arc<CredentialTransfer>,
    pub relay: Arc<ExtensionRelay>,
    pub drivers: FlowDrivers,
    /// Fires once shutdown begins.
    pub shutdown: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl AuthService {
    /// Wire the standard collaborators from configuration.
    pub fn new(config: AuthConfig) -> anyhow::Result<Self> {
        let transfer = CredentialTransfer::new(config.home());
        Self::with_transfer(config, transfer)
    }

    /// Like [`AuthService::new`] with a caller-supplied transfer (custom
    /// transport programs or home).
    pub fn with_transfer(config: AuthConfig, transfer: CredentialTransfer) -> anyhow::Result<Self> {
        crate::ensure_crypto_provider();
        let hub = Arc::new(NotificationHub::new(config.subscriber_queue));
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&hub), config.session_ttl()));
        let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        let deps = FlowDeps {
            registry: Arc::clone(&registry),
            hub: Arc::clone(&hub),
            transfer: Arc::new(transfer),
            relay: Arc::new(ExtensionRelay::new(config.subscriber_queue)),
            http,
        };
        let drivers = FlowDrivers::from_config(&config, &deps);
        Ok(Self::from_parts(config, deps, drivers))
    }

    /// Assemble from pre-built parts.
    pub fn from_parts(config: AuthConfig, deps: FlowDeps, drivers: FlowDrivers) -> Self {
        Self {
            config,
            registry: deps.registry,
            hub: deps.hub,
            transfer: deps.transfer,
            relay: deps.relay,
            drivers,
            shutdown: CancellationToken::new(),
            monitor: Mutex::new(None),
        }
    }

    /// Start the background expiry monitor. Idempotent.
    pub fn start(&self) {
        let mut slot = self.monitor.lock();
        if slot.is_some() {
            return;
        }
        let monitor = ExpiryMonitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.hub),
            self.drivers.clone(),
            self.config.expiry_tick(),
            self.config.refresh_lookahead(),
            self.config.terminal_grace(),
        );
        *slot = Some(monitor.spawn(self.shutdown.clone()));
    }

    fn driver(&self, tool: Tool) -> Arc<dyn FlowDriver> {
        self.drivers.for_tool(tool)
    }

    /// Create a session and start its flow.
    ///
    /// A flow that fails to start leaves the session `failed` and returns
    /// the error; the session stays queryable.
    pub async fn create_session(
        &self,
        tool: Tool,
        target: Option<RemoteTarget>,
    ) -> Result<AuthSession, AuthError> {
        if self.shutdown.is_cancelled() {
            return Err(AuthError::internal(SHUTDOWN_MESSAGE));
        }
        if let Some(ref target) = target {
            target.validate()?;
        }
        let session = self.registry.create(tool, target);
        tracing::info!(session_id = %session.id, tool = %tool, "session requested");
        self.driver(tool).start(&session).await
    }

    pub fn get(&self, id: &str) -> Result<AuthSession, AuthError> {
        self.registry.get(id)
    }

    pub fn list(&self) -> Vec<AuthSession> {
        self.registry.list()
    }

    pub async fn submit_code(&self, id: &str, code: &str) -> Result<AuthSession, AuthError> {
        let session = self.registry.get(id)?;
        self.driver(session.tool).submit_code(id, code).await
    }

    pub async fn submit_tokens(
        &self,
        id: &str,
        tokens: TokenBundle,
    ) -> Result<AuthSession, AuthError> {
        let session = self.registry.get(id)?;
        self.driver(session.tool).submit_tokens(id, tokens).await
    }

    /// Cancel a session and tear down its flow. `false` if already terminal.
    pub fn cancel(&self, id: &str) -> Result<bool, AuthError> {
        let session = self.registry.get(id)?;
        let cancelled = self.registry.cancel(id)?;
        if cancelled {
            self.driver(session.tool).cancel(id);
            tracing::info!(session_id = %id, tool = %session.tool, "session cancelled");
        }
        Ok(cancelled)
    }

    /// Per-tool credential state from the local canonical files.
    pub async fn auth_status(&self) -> BTreeMap<Tool, ToolAuthStatus> {
        let active = self.registry.list_active();
        let lookahead_ms = u64::try_from(self.config.refresh_lookahead().as_millis()).unwrap_or(0);
        let now = epoch_ms();
        let mut out = BTreeMap::new();
        for tool in Tool::ALL {
            let status = if active.iter().any(|s| s.tool == tool) {
                ToolAuthStatus::InProgress
            } else {
                let payload = self.transfer.read_local(tool).await.ok();
                probe_status(tool, payload.as_deref(), now, lookahead_ms)
            };
            out.insert(tool, status);
        }
        out
    }

    pub async fn sync(
        &self,
        tool: Tool,
        direction: SyncDirection,
        target: &RemoteTarget,
    ) -> Result<TransferResult, AuthError> {
        self.transfer.sync(tool, direction, target).await
    }

    /// Dispatch an inbound extension frame and build the reply.
    pub async fn handle_extension(&self, msg: RelayInbound) -> RelayOutbound {
        let session_id = msg.session_id().to_owned();
        let result = match msg {
            RelayInbound::AuthCode { session_id, code } => self.submit_code(&session_id, &code).await,
            RelayInbound::AuthTokens { session_id, tokens } => {
                self.submit_tokens(&session_id, tokens).await
            }
        };
        match result {
            Ok(session) => RelayOutbound::Ack {
                session_id,
                ok: true,
                message: format!("session {}", session.status),
            },
            Err(e) => {
                tracing::debug!(session_id = %session_id, err = %e, "extension frame rejected");
                RelayOutbound::Ack { session_id, ok: false, message: e.to_string() }
            }
        }
    }

    /// Stop the monitor and cancel every in-flight session.
    ///
    /// Returns the ids cancelled. Safe to call more than once.
    pub async fn shutdown(&self) -> Vec<String> {
        self.shutdown.cancel();
        let handle = self.monitor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let active = self.registry.list_active();
        let cancelled = self.registry.shutdown(SHUTDOWN_MESSAGE);
        for session in active.iter().filter(|s| cancelled.contains(&s.id)) {
            self.driver(session.tool).cancel(&session.id);
        }
        if !cancelled.is_empty() {
            tracing::info!(cancelled = cancelled.len(), "in-flight sessions cancelled");
        }
        cancelled
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
