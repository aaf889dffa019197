// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication session records and the session state machine.
//!
//! An [`AuthSession`] is owned by the [`registry::SessionRegistry`]; everything
//! else only ever sees snapshots. Status changes go through
//! [`SessionStatus::can_transition_to`], so an illegal edge is rejected before
//! any field is touched.

pub mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::transfer::RemoteTarget;

/// External CLI tools that authmux can authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Claude,
    Azure,
    Gcloud,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::Claude, Tool::Azure, Tool::Gcloud];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Azure => "azure",
            Self::Gcloud => "gcloud",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "azure" | "az" => Ok(Self::Azure),
            "gcloud" | "google" => Ok(Self::Gcloud),
            other => Err(format!("unknown tool: {other}")),
        }
    }
}

/// Lifecycle status of an authentication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    AwaitingBrowser,
    AwaitingCode,
    Exchanging,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 8] = [
        SessionStatus::Pending,
        SessionStatus::AwaitingBrowser,
        SessionStatus::AwaitingCode,
        SessionStatus::Exchanging,
        SessionStatus::Completed,
        SessionStatus::Failed,
        SessionStatus::Cancelled,
        SessionStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingBrowser => "awaiting_browser",
            Self::AwaitingCode => "awaiting_code",
            Self::Exchanging => "exchanging",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::Expired)
    }

    /// Whether the expiry sweep may claim a session in this status.
    pub fn is_expirable(&self) -> bool {
        matches!(self, Self::Pending | Self::AwaitingBrowser | Self::AwaitingCode)
    }

    /// The session state machine's edge table.
    ///
    /// `Pending -> Failed` covers flows that fail before reaching the browser
    /// (subprocess spawn failure, device URL never observed).
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Pending, AwaitingBrowser) => true,
            (AwaitingBrowser, AwaitingCode) => true,
            (AwaitingCode, Exchanging) => true,
            (Exchanging, Completed | Failed) => true,
            (Pending, Failed) => true,
            (from, Cancelled) => !from.is_terminal(),
            (from, Expired) => from.is_expirable(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a single authentication session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub id: String,
    pub tool: Tool,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Epoch millis.
    pub created_at: u64,
    /// Epoch millis of the last recorded change.
    pub updated_at: u64,
    /// Epoch millis. Session deadline while in flight; credential expiry once
    /// completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RemoteTarget>,
}

impl AuthSession {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Optional field changes applied together with a status transition.
///
/// `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub auth_url: Option<String>,
    pub user_code: Option<String>,
    pub message: Option<String>,
    pub expires_at: Option<u64>,
}

impl SessionUpdate {
    pub fn message(message: impl Into<String>) -> Self {
        Self { message: Some(message.into()), ..Default::default() }
    }

    pub fn with_expires_at(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub(crate) fn apply(self, session: &mut AuthSession) {
        if let Some(url) = self.auth_url {
            session.auth_url = Some(url);
        }
        if let Some(code) = self.user_code {
            session.user_code = Some(code);
        }
        if let Some(message) = self.message {
            session.message = Some(message);
        }
        if let Some(expires_at) = self.expires_at {
            session.expires_at = Some(expires_at);
        }
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
