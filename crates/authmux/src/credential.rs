// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth credential payloads and their on-disk format.
//!
//! The Claude credential file is compatibility-critical: it is read by the
//! Claude CLI itself. Two shapes exist in the wild and both are accepted:
//!
//! **Nested** (what we write):
//! ```json
//! {"claudeAiOauth": {"accessToken": "sk-...", "refreshToken": "sk-...", "expiresAt": 1770982078349, "scopes": ["user:inference"], "subscriptionType": "max"}}
//! ```
//!
//! **Flat**:
//! ```json
//! {"accessToken": "sk-...", "refreshToken": "sk-...", "expiresAt": 1770982078349}
//! ```
//!
//! `expiresAt` is milliseconds since the Unix epoch in both.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, ErrorCode};
use crate::flow::oauth::TokenResponse;
use crate::session::Tool;

/// Credential file location relative to the home directory.
pub fn relative_path(tool: Tool) -> &'static str {
    match tool {
        Tool::Claude => ".claude/.credentials.json",
        Tool::Azure => ".azure/msal_token_cache.json",
        Tool::Gcloud => ".config/gcloud/application_default_credentials.json",
    }
}

/// Tool-specific OAuth payload.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Epoch millis.
    #[serde(default)]
    pub expires_at: u64,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_tier: Option<String>,
}

impl Credentials {
    /// Build credentials from a token endpoint response received at `now_ms`.
    pub fn from_token_response(token: &TokenResponse, now_ms: u64) -> Self {
        Self {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: expiry_from(now_ms, token.expires_in),
            scopes: parse_scopes(token.scope.as_deref().unwrap_or_default()),
            subscription_type: None,
            rate_limit_tier: None,
        }
    }

    /// Apply a refresh response, keeping the old refresh token when the
    /// provider does not rotate it.
    pub fn refreshed(&self, token: &TokenResponse, now_ms: u64) -> Self {
        let mut next = Self::from_token_response(token, now_ms);
        if next.refresh_token.is_none() {
            next.refresh_token = self.refresh_token.clone();
        }
        if next.scopes.is_empty() {
            next.scopes = self.scopes.clone();
        }
        next.subscription_type = self.subscription_type.clone();
        next.rate_limit_tier = self.rate_limit_tier.clone();
        next
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at != 0 && self.expires_at <= now_ms
    }

    /// Serialize in the nested `claudeAiOauth` file format.
    pub fn to_claude_file(&self) -> Result<Vec<u8>, AuthError> {
        let file = ClaudeCredentialFile { claude_ai_oauth: self.clone() };
        serde_json::to_vec_pretty(&file)
            .map_err(|e| AuthError::internal(format!("cannot encode credentials: {e}")))
    }

    /// Parse a Claude credential file (nested or flat).
    pub fn parse_claude_file(bytes: &[u8]) -> Result<Self, AuthError> {
        let invalid = |msg: String| AuthError::new(ErrorCode::BadRequest, msg);
        let root: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| invalid(format!("invalid JSON: {e}")))?;

        // Try nested format first, then flat.
        let obj = root.get("claudeAiOauth").unwrap_or(&root);
        let creds: Credentials = serde_json::from_value(obj.clone())
            .map_err(|e| invalid(format!("invalid credential payload: {e}")))?;
        if creds.access_token.is_empty() {
            return Err(invalid("missing or empty accessToken".to_owned()));
        }
        Ok(creds)
    }
}

// Hand-written so tokens never reach logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("expires_at", &self.expires_at)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scopes", &self.scopes)
            .field("subscription_type", &self.subscription_type)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ClaudeCredentialFile {
    #[serde(rename = "claudeAiOauth")]
    claude_ai_oauth: Credentials,
}

/// Absolute expiry in epoch millis, or 0 (no expiry) when `expires_in` is 0.
pub fn expiry_from(now_ms: u64, expires_in_secs: u64) -> u64 {
    if expires_in_secs == 0 {
        0
    } else {
        now_ms.saturating_add(expires_in_secs.saturating_mul(1000))
    }
}

pub fn parse_scopes(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_owned).collect()
}

/// Coarse credential state for a tool, as reported by `GET /auth/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAuthStatus {
    Authenticated,
    /// Valid but inside the refresh lookahead.
    Expiring,
    Expired,
    Missing,
    /// A non-terminal session exists for the tool.
    InProgress,
}

/// Classify a local credential payload.
///
/// Only the Claude file carries an expiry we understand; the device-flow CLIs
/// manage their own caches, so presence is all we check.
pub fn probe_status(tool: Tool, payload: Option<&[u8]>, now_ms: u64, lookahead_ms: u64) -> ToolAuthStatus {
    let Some(bytes) = payload else {
        return ToolAuthStatus::Missing;
    };
    match tool {
        Tool::Claude => match Credentials::parse_claude_file(bytes) {
            Ok(creds) if creds.is_expired(now_ms) => ToolAuthStatus::Expired,
            Ok(creds) if creds.expires_at != 0 && creds.expires_at <= now_ms + lookahead_ms => {
                ToolAuthStatus::Expiring
            }
            Ok(_) => ToolAuthStatus::Authenticated,
            Err(_) => ToolAuthStatus::Missing,
        },
        Tool::Azure | Tool::Gcloud if bytes.is_empty() => ToolAuthStatus::Missing,
        Tool::Azure | Tool::Gcloud => ToolAuthStatus::Authenticated,
    }
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
