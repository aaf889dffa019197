// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background expiry sweep and credential refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCode;
use crate::events::{AuthEvent, NotificationHub};
use crate::flow::FlowDrivers;
use crate::session::epoch_ms;
use crate::session::registry::SessionRegistry;

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub expired: Vec<String>,
    pub refreshed: Vec<String>,
    pub refresh_failed: Vec<String>,
    pub collected: usize,
}

/// Periodically expires stale sessions, refreshes tracked credentials, and
/// collects old terminal sessions.
pub struct ExpiryMonitor {
    registry: Arc<SessionRegistry>,
    hub: Arc<NotificationHub>,
    drivers: FlowDrivers,
    tick: Duration,
    lookahead: Duration,
    grace: Duration,
}

impl ExpiryMonitor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        hub: Arc<NotificationHub>,
        drivers: FlowDrivers,
        tick: Duration,
        lookahead: Duration,
        grace: Duration,
    ) -> Self {
        Self { registry, hub, drivers, tick, lookahead, grace }
    }

    /// Run until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.tick);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = timer.tick() => {}
                }
                let report = self.tick_once(epoch_ms()).await;
                if report != TickReport::default() {
                    tracing::debug!(
                        expired = report.expired.len(),
                        refreshed = report.refreshed.len(),
                        refresh_failed = report.refresh_failed.len(),
                        collected = report.collected,
                        "expiry tick"
                    );
                }
            }
            tracing::debug!("expiry monitor stopped");
        })
    }

    /// One sweep at time `now` (epoch millis).
    pub async fn tick_once(&self, now: u64) -> TickReport {
        let mut report = TickReport::default();

        for session in self.registry.expire_due(now) {
            self.drivers.for_tool(session.tool).cancel(&session.id);
            tracing::info!(session_id = %session.id, tool = %session.tool, "session expired");
            report.expired.push(session.id);
        }

        for session in self.registry.refresh_candidates(now, self.lookahead) {
            let driver = self.drivers.for_tool(session.tool);
            if !driver.supports_refresh() {
                continue;
            }
            match driver.refresh(&session).await {
                Ok(expires_at) => {
                    let expires_at = (expires_at != 0).then_some(expires_at);
                    match self.registry.touch_expiry(&session.id, expires_at) {
                        Ok(_) => report.refreshed.push(session.id),
                        // Removed or replaced mid-refresh; the file is still fresh.
                        Err(e) if e.code == ErrorCode::NotFound => {}
                        Err(e) => {
                            tracing::debug!(session_id = %session.id, err = %e, "expiry not updated");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.id,
                        tool = %session.tool,
                        err = %e,
                        "credential refresh failed"
                    );
                    self.hub.publish(AuthEvent::TokenExpiring {
                        session_id: session.id.clone(),
                        tool: session.tool,
                        expires_at: session.expires_at.unwrap_or_default(),
                        error: e.message,
                    });
                    report.refresh_failed.push(session.id);
                }
            }
        }

        report.collected = self.registry.gc(now, self.grace);
        report
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
