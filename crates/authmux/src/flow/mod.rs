// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-tool authentication flows.
//!
//! Each tool gets one [`FlowDriver`]: the browser-relay PKCE driver for
//! claude, the device-code subprocess driver for azure and gcloud. Drivers
//! hold a [`FlowContext`] per live session and report progress exclusively
//! through the [`SessionRegistry`].

pub mod browser;
pub mod device;
pub mod device_parse;
pub mod oauth;
pub mod pkce;

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::AuthConfig;
use crate::credential::{parse_scopes, Credentials};
use crate::error::{AuthError, ErrorCode};
use crate::events::NotificationHub;
use crate::relay::ExtensionRelay;
use crate::session::registry::SessionRegistry;
use crate::session::{AuthSession, Tool};
use crate::transfer::CredentialTransfer;

/// Boxed future returned by [`FlowDriver`] methods.
pub type FlowFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AuthError>> + Send + 'a>>;

/// One tool's authentication flow.
pub trait FlowDriver: Send + Sync {
    fn tool(&self) -> Tool;

    /// Begin the flow for a freshly created `pending` session.
    fn start<'a>(&'a self, session: &'a AuthSession) -> FlowFuture<'a, AuthSession>;

    /// Accept an authorization code captured out of band.
    fn submit_code<'a>(&'a self, session_id: &'a str, code: &'a str)
        -> FlowFuture<'a, AuthSession>;

    /// Accept a token bundle captured out of band, skipping the code exchange.
    fn submit_tokens<'a>(
        &'a self,
        session_id: &'a str,
        tokens: TokenBundle,
    ) -> FlowFuture<'a, AuthSession>;

    /// Tear down the session's flow context. Idempotent.
    fn cancel(&self, session_id: &str);

    fn supports_refresh(&self) -> bool {
        false
    }

    /// Refresh the credential a completed session wrote. Returns the new
    /// expiry in epoch millis.
    fn refresh<'a>(&'a self, session: &'a AuthSession) -> FlowFuture<'a, u64> {
        Box::pin(async move {
            Err(AuthError::unsupported(format!("{} does not support refresh", session.tool)))
        })
    }
}

/// Ephemeral execution state of one live flow.
pub struct FlowContext<S> {
    pub cancel: CancellationToken,
    pub state: S,
}

/// A driver's live flow contexts, at most one per session.
pub struct FlowContexts<S> {
    inner: Mutex<HashMap<String, FlowContext<S>>>,
}

impl<S> Default for FlowContexts<S> {
    fn default() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }
}

impl<S> FlowContexts<S> {
    /// Register a context; rejects a second flow for the same session.
    pub fn insert(&self, session_id: &str, ctx: FlowContext<S>) -> Result<(), AuthError> {
        let mut inner = self.inner.lock();
        if inner.contains_key(session_id) {
            return Err(AuthError::new(
                ErrorCode::InvalidTransition,
                format!("session {session_id} already has a running flow"),
            ));
        }
        inner.insert(session_id.to_owned(), ctx);
        Ok(())
    }

    pub fn take(&self, session_id: &str) -> Option<FlowContext<S>> {
        self.inner.lock().remove(session_id)
    }

    pub fn with<R>(&self, session_id: &str, f: impl FnOnce(&mut FlowContext<S>) -> R) -> Option<R> {
        self.inner.lock().get_mut(session_id).map(f)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.inner.lock().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tokens relayed directly by the browser extension.
///
/// Accepts both snake_case and camelCase field names since extensions lift
/// these straight from whatever the provider page exposes.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(default, alias = "refreshToken", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry, epoch millis.
    #[serde(default, alias = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Relative lifetime in seconds; used when `expires_at` is absent.
    #[serde(default, alias = "expiresIn", skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default, alias = "subscriptionType", skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
}

impl TokenBundle {
    pub fn into_credentials(self, now_ms: u64) -> Result<Credentials, AuthError> {
        if self.access_token.trim().is_empty() {
            return Err(AuthError::new(ErrorCode::BadRequest, "token bundle has no access token"));
        }
        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => at,
            (None, Some(secs)) => crate::credential::expiry_from(now_ms, secs),
            (None, None) => 0,
        };
        let mut scopes: BTreeSet<String> = self.scopes.into_iter().collect();
        scopes.extend(parse_scopes(self.scope.as_deref().unwrap_or_default()));
        Ok(Credentials {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            scopes,
            subscription_type: self.subscription_type,
            rate_limit_tier: None,
        })
    }
}

impl std::fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBundle")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Shared collaborators handed to every driver.
#[derive(Clone)]
pub struct FlowDeps {
    pub registry: Arc<SessionRegistry>,
    pub hub: Arc<NotificationHub>,
    pub transfer: Arc<CredentialTransfer>,
    pub relay: Arc<ExtensionRelay>,
    pub http: reqwest::Client,
}

/// Driver factory keyed on [`Tool`].
#[derive(Clone)]
pub struct FlowDrivers {
    claude: Arc<dyn FlowDriver>,
    azure: Arc<dyn FlowDriver>,
    gcloud: Arc<dyn FlowDriver>,
}

impl FlowDrivers {
    pub fn new(
        claude: Arc<dyn FlowDriver>,
        azure: Arc<dyn FlowDriver>,
        gcloud: Arc<dyn FlowDriver>,
    ) -> Self {
        Self { claude, azure, gcloud }
    }

    /// Build the standard driver set from configuration.
    pub fn from_config(config: &AuthConfig, deps: &FlowDeps) -> Self {
        let claude = browser::BrowserDriver::new(config.claude_client(), deps.clone());
        let azure = device::DeviceDriver::new(
            Tool::Azure,
            config.azure_command.clone(),
            config.device_url_timeout(),
            deps.clone(),
        );
        let gcloud = device::DeviceDriver::new(
            Tool::Gcloud,
            config.gcloud_command.clone(),
            config.device_url_timeout(),
            deps.clone(),
        );
        Self::new(Arc::new(claude), Arc::new(azure), Arc::new(gcloud))
    }

    pub fn for_tool(&self, tool: Tool) -> Arc<dyn FlowDriver> {
        match tool {
            Tool::Claude => Arc::clone(&self.claude),
            Tool::Azure => Arc::clone(&self.azure),
            Tool::Gcloud => Arc::clone(&self.gcloud),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
