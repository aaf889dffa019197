// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory owner of every [`AuthSession`].
//!
//! The id map is locked only long enough to find or insert a slot; each slot
//! carries its own mutex, so operations on different sessions never contend.
//! Nothing async runs while a slot is locked. Progress events are published
//! under the slot lock, which keeps per-session event order identical to
//! transition order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{AuthError, ErrorCode};
use crate::events::{AuthEvent, NotificationHub};
use crate::session::{epoch_ms, AuthSession, SessionStatus, SessionUpdate, Tool};
use crate::transfer::RemoteTarget;

struct SessionSlot {
    record: Mutex<AuthSession>,
    /// Cancelled when the session reaches any terminal state.
    cancel: CancellationToken,
}

/// Owns session records and enforces the state machine.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    hub: Arc<NotificationHub>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(hub: Arc<NotificationHub>, ttl: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), hub, ttl }
    }

    /// Allocate a fresh `pending` session.
    pub fn create(&self, tool: Tool, target: Option<RemoteTarget>) -> AuthSession {
        let now = epoch_ms();
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        let mut session = AuthSession {
            id: String::new(),
            tool,
            status: SessionStatus::Pending,
            auth_url: None,
            user_code: None,
            message: None,
            created_at: now,
            updated_at: now,
            expires_at: Some(now.saturating_add(ttl_ms)),
            target,
        };

        let slot = {
            let mut sessions = self.sessions.write();
            // v4 collisions are astronomically unlikely; the loop makes
            // uniqueness unconditional.
            let mut id = uuid::Uuid::new_v4().to_string();
            while sessions.contains_key(&id) {
                id = uuid::Uuid::new_v4().to_string();
            }
            session.id = id.clone();
            let slot = Arc::new(SessionSlot {
                record: Mutex::new(session.clone()),
                cancel: CancellationToken::new(),
            });
            sessions.insert(id, Arc::clone(&slot));
            slot
        };

        let record = slot.record.lock();
        tracing::debug!(session_id = %record.id, tool = %tool, "session created");
        self.hub.publish(AuthEvent::Progress { session: record.clone() });
        record.clone()
    }

    pub fn get(&self, id: &str) -> Result<AuthSession, AuthError> {
        Ok(self.slot(id)?.record.lock().clone())
    }

    /// Every session, oldest first.
    pub fn list(&self) -> Vec<AuthSession> {
        let mut all: Vec<AuthSession> =
            self.slots().iter().map(|slot| slot.record.lock().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// All non-terminal sessions, oldest first.
    pub fn list_active(&self) -> Vec<AuthSession> {
        self.list().into_iter().filter(|s| !s.is_terminal()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move a session along one edge of the state machine.
    ///
    /// An illegal edge returns `InvalidTransition` and leaves the record
    /// untouched.
    pub fn transition(
        &self,
        id: &str,
        next: SessionStatus,
        update: SessionUpdate,
    ) -> Result<AuthSession, AuthError> {
        let slot = self.slot(id)?;
        let mut record = slot.record.lock();
        if !record.status.can_transition_to(next) {
            return Err(AuthError::new(
                ErrorCode::InvalidTransition,
                format!("session {id}: {} -> {next} is not allowed", record.status),
            ));
        }

        let prev = record.status;
        record.status = next;
        record.updated_at = epoch_ms().max(record.updated_at);
        if next.is_terminal() {
            // The in-flight deadline is meaningless once terminal.
            record.expires_at = None;
        }
        update.apply(&mut record);
        if next.is_terminal() {
            slot.cancel.cancel();
        }

        tracing::debug!(session_id = %id, from = %prev, to = %next, "session transition");
        self.hub.publish(AuthEvent::Progress { session: record.clone() });
        Ok(record.clone())
    }

    /// Cancel a non-terminal session. Returns `false` without touching the
    /// record if it is already terminal.
    pub fn cancel(&self, id: &str) -> Result<bool, AuthError> {
        self.cancel_with(id, "cancelled by request")
    }

    pub fn cancel_with(&self, id: &str, message: &str) -> Result<bool, AuthError> {
        match self.transition(id, SessionStatus::Cancelled, SessionUpdate::message(message)) {
            Ok(_) => Ok(true),
            Err(e) if e.code == ErrorCode::InvalidTransition => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Token that fires when the session reaches a terminal state.
    pub fn cancel_token(&self, id: &str) -> Result<CancellationToken, AuthError> {
        Ok(self.slot(id)?.cancel.clone())
    }

    /// Replace `expires_at` without a status change (credential refresh).
    /// `None` stops expiry tracking.
    ///
    /// Only live sessions and completed sessions carry a meaningful expiry.
    pub fn touch_expiry(
        &self,
        id: &str,
        expires_at: Option<u64>,
    ) -> Result<AuthSession, AuthError> {
        let slot = self.slot(id)?;
        let mut record = slot.record.lock();
        if record.is_terminal() && record.status != SessionStatus::Completed {
            return Err(AuthError::new(
                ErrorCode::InvalidTransition,
                format!("session {id} is {}; expiry is fixed", record.status),
            ));
        }
        record.expires_at = expires_at;
        record.updated_at = epoch_ms().max(record.updated_at);
        self.hub.publish(AuthEvent::Progress { session: record.clone() });
        Ok(record.clone())
    }

    /// Expire every expirable session whose deadline has passed.
    ///
    /// Returns the sessions this call expired; a session is only ever
    /// returned once since `expired` has no outgoing edges.
    pub fn expire_due(&self, now: u64) -> Vec<AuthSession> {
        let mut expired = Vec::new();
        for slot in self.slots() {
            let due = {
                let record = slot.record.lock();
                record.status.is_expirable() && record.expires_at.is_some_and(|at| at <= now)
            };
            if !due {
                continue;
            }
            let id = slot.record.lock().id.clone();
            // Re-checked under the lock inside `transition`.
            match self.transition(
                &id,
                SessionStatus::Expired,
                SessionUpdate::message("session expired before completion"),
            ) {
                Ok(session) => expired.push(session),
                Err(e) => tracing::debug!(session_id = %id, err = %e, "expiry raced another transition"),
            }
        }
        expired
    }

    /// Completed sessions whose credential expiry falls within `lookahead`.
    ///
    /// Only the newest completed session per (tool, target) is returned; older
    /// ones describe a credential that has since been overwritten.
    pub fn refresh_candidates(&self, now: u64, lookahead: Duration) -> Vec<AuthSession> {
        let horizon = now.saturating_add(u64::try_from(lookahead.as_millis()).unwrap_or(u64::MAX));
        self.newest_completed()
            .into_values()
            .filter(|s| s.expires_at.is_some_and(|at| at <= horizon))
            .collect()
    }

    /// Drop terminal sessions older than `grace`, keeping the newest
    /// completed session per (tool, target) while its expiry is tracked.
    pub fn gc(&self, now: u64, grace: Duration) -> usize {
        let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        let keep: Vec<String> = self
            .newest_completed()
            .into_values()
            .filter(|s| s.expires_at.is_some())
            .map(|s| s.id)
            .collect();

        let doomed: Vec<String> = self
            .slots()
            .iter()
            .filter_map(|slot| {
                let record = slot.record.lock();
                let stale = record.is_terminal()
                    && record.updated_at.saturating_add(grace_ms) <= now
                    && !keep.contains(&record.id);
                stale.then(|| record.id.clone())
            })
            .collect();

        for id in &doomed {
            self.remove(id);
        }
        if !doomed.is_empty() {
            tracing::debug!(removed = doomed.len(), "collected terminal sessions");
        }
        doomed.len()
    }

    /// Forget a session entirely. Live sessions are cancelled first.
    pub fn remove(&self, id: &str) -> Option<AuthSession> {
        let slot = self.sessions.write().remove(id)?;
        slot.cancel.cancel();
        self.hub.close(id);
        let record = slot.record.lock().clone();
        Some(record)
    }

    /// Cancel every non-terminal session. Returns the ids that were cancelled.
    pub fn shutdown(&self, message: &str) -> Vec<String> {
        let mut cancelled = Vec::new();
        for session in self.list_active() {
            match self.cancel_with(&session.id, message) {
                Ok(true) => cancelled.push(session.id),
                Ok(false) => {}
                Err(e) => tracing::debug!(session_id = %session.id, err = %e, "shutdown cancel skipped"),
            }
        }
        cancelled
    }

    fn slot(&self, id: &str) -> Result<Arc<SessionSlot>, AuthError> {
        self.sessions.read().get(id).cloned().ok_or_else(|| AuthError::not_found(id))
    }

    fn slots(&self) -> Vec<Arc<SessionSlot>> {
        self.sessions.read().values().cloned().collect()
    }

    fn newest_completed(&self) -> HashMap<(Tool, String), AuthSession> {
        let mut newest: HashMap<(Tool, String), AuthSession> = HashMap::new();
        for session in self.list() {
            if session.status != SessionStatus::Completed {
                continue;
            }
            let target_key =
                session.target.as_ref().map(RemoteTarget::key).unwrap_or_else(|| "local".to_owned());
            let key = (session.tool, target_key);
            match newest.get(&key) {
                Some(existing) if existing.updated_at > session.updated_at => {}
                _ => {
                    newest.insert(key, session);
                }
            }
        }
        newest
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
