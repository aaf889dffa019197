// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification hub: fans out session events to dashboard subscribers.
//!
//! Every subscriber owns a bounded broadcast queue. Publishing never waits on
//! a subscriber; when a queue is full the oldest event is overwritten and the
//! lagging subscriber is told how many events it missed.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::{AuthSession, Tool};

/// Channel name that receives every event regardless of session.
pub const GLOBAL_CHANNEL: &str = "*";

/// Events pushed to dashboard and extension subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    /// A session changed status or fields.
    Progress { session: AuthSession },
    /// Raw text from a subprocess-backed flow.
    #[serde(rename_all = "camelCase")]
    Output { session_id: String, data: String },
    /// A tracked credential is close to expiry and could not be refreshed.
    #[serde(rename_all = "camelCase")]
    TokenExpiring { session_id: String, tool: Tool, expires_at: u64, error: String },
}

impl AuthEvent {
    /// Return the session identifier for this event.
    pub fn session_id(&self) -> &str {
        match self {
            Self::Progress { session } => &session.id,
            Self::Output { session_id, .. } | Self::TokenExpiring { session_id, .. } => session_id,
        }
    }
}

/// Fan-out of [`AuthEvent`]s keyed by session id, plus a global wildcard.
pub struct NotificationHub {
    channels: Mutex<HashMap<String, broadcast::Sender<AuthEvent>>>,
    global: broadcast::Sender<AuthEvent>,
    capacity: usize,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (global, _) = broadcast::channel(capacity);
        Self { channels: Mutex::new(HashMap::new()), global, capacity }
    }

    /// Subscribe to a session id, or to [`GLOBAL_CHANNEL`] for everything.
    pub fn subscribe(&self, channel: &str) -> Subscription {
        let rx = if channel == GLOBAL_CHANNEL {
            self.global.subscribe()
        } else {
            let mut channels = self.channels.lock();
            channels
                .entry(channel.to_owned())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        Subscription { channel: channel.to_owned(), rx }
    }

    /// Deliver an event to the session channel and the global channel.
    pub fn publish(&self, event: AuthEvent) {
        {
            let mut channels = self.channels.lock();
            let session_id = event.session_id();
            let drop_channel = match channels.get(session_id) {
                Some(tx) => tx.send(event.clone()).is_err(),
                None => false,
            };
            // Nobody is listening any more.
            if drop_channel {
                channels.remove(session_id);
            }
        }
        let _ = self.global.send(event);
    }

    /// Drop a session channel; its subscribers see the stream end.
    pub fn close(&self, session_id: &str) {
        self.channels.lock().remove(session_id);
    }

    /// Number of live subscribers on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        if channel == GLOBAL_CHANNEL {
            return self.global.receiver_count();
        }
        self.channels.lock().get(channel).map(|tx| tx.receiver_count()).unwrap_or(0)
    }
}

/// Something a [`Subscription`] yields.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(AuthEvent),
    /// The subscriber fell behind and this many oldest events were dropped.
    Lagged(u64),
}

/// Handle returned by [`NotificationHub::subscribe`].
pub struct Subscription {
    channel: String,
    rx: broadcast::Receiver<AuthEvent>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next delivery. `None` once the channel is closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        match self.rx.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(Delivery::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Wait for the next event, skipping lag notices.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.next().await? {
                Delivery::Event(event) => return Some(event),
                Delivery::Lagged(n) => {
                    tracing::debug!(channel = %self.channel, lagged = n, "subscriber lagged");
                }
            }
        }
    }

    /// Take an already-queued delivery without waiting.
    pub fn try_next(&mut self) -> Option<Delivery> {
        match self.rx.try_recv() {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Some(Delivery::Lagged(n)),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
