// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Browser-relay PKCE flow.
//!
//! `start` publishes an authorization URL and waits; the browser extension
//! captures the resulting code (or the tokens themselves) and hands it back.
//! Each session gets exactly one exchange attempt. A failed exchange fails
//! the session and the caller starts a new one.

use std::future::Future;

use tracing::{debug, info, warn};

use crate::credential::Credentials;
use crate::error::{AuthError, ErrorCode};
use crate::flow::oauth;
use crate::flow::pkce::{
    build_auth_url, compute_code_challenge, exchange_code, generate_code_verifier, generate_state,
    split_code_state, OAuthClient,
};
use crate::flow::{FlowContext, FlowContexts, FlowDeps, FlowDriver, FlowFuture, TokenBundle};
use crate::session::{epoch_ms, AuthSession, SessionStatus, SessionUpdate, Tool};
use crate::transfer::RemoteTarget;

/// PKCE material bound to one authorization request.
pub struct PkceState {
    pub code_verifier: String,
    pub state: String,
}

/// Flow driver for tools that authenticate with an authorization code + PKCE.
pub struct BrowserDriver {
    client: OAuthClient,
    deps: FlowDeps,
    contexts: FlowContexts<PkceState>,
}

impl BrowserDriver {
    pub fn new(client: OAuthClient, deps: FlowDeps) -> Self {
        Self { client, deps, contexts: FlowContexts::default() }
    }

    /// Whether a session still holds PKCE material.
    pub fn has_context(&self, session_id: &str) -> bool {
        self.contexts.contains(session_id)
    }

    async fn start_flow(&self, session: &AuthSession) -> Result<AuthSession, AuthError> {
        let id = session.id.as_str();
        let cancel = self.deps.registry.cancel_token(id)?.child_token();
        let code_verifier = generate_code_verifier();
        let state = generate_state();
        let url = build_auth_url(&self.client, &compute_code_challenge(&code_verifier), &state);

        self.contexts.insert(
            id,
            FlowContext {
                cancel,
                state: PkceState { code_verifier: code_verifier.clone(), state },
            },
        )?;

        let update = SessionUpdate {
            auth_url: Some(url.clone()),
            message: Some("waiting for browser authorization".to_owned()),
            ..Default::default()
        };
        match self.deps.registry.transition(id, SessionStatus::AwaitingBrowser, update) {
            Ok(next) => {
                self.deps.relay.push_auth_url(id, &url, &code_verifier);
                info!(session_id = %id, tool = %session.tool, "browser flow started");
                Ok(next)
            }
            Err(e) => {
                self.contexts.take(id);
                Err(e)
            }
        }
    }

    /// Claim the session's single exchange attempt and move it to `exchanging`.
    fn claim(&self, session_id: &str) -> Result<FlowContext<PkceState>, AuthError> {
        let session = self.deps.registry.get(session_id)?;
        if !matches!(session.status, SessionStatus::AwaitingBrowser | SessionStatus::AwaitingCode) {
            return Err(AuthError::new(
                ErrorCode::InvalidTransition,
                format!("session {session_id} is {}; not waiting for a code", session.status),
            ));
        }
        let ctx = self.contexts.take(session_id).ok_or_else(|| {
            AuthError::new(
                ErrorCode::InvalidTransition,
                format!("session {session_id} has no flow in progress"),
            )
        })?;
        self.deps.relay.resolve(session_id);

        let registry = &self.deps.registry;
        if session.status == SessionStatus::AwaitingBrowser {
            registry.transition(session_id, SessionStatus::AwaitingCode, SessionUpdate::default())?;
        }
        registry.transition(
            session_id,
            SessionStatus::Exchanging,
            SessionUpdate::message("exchanging authorization code"),
        )?;
        Ok(ctx)
    }

    async fn exchange(&self, session_id: &str, raw: &str) -> Result<AuthSession, AuthError> {
        let (code, pasted_state) = split_code_state(raw);
        if code.is_empty() {
            return Err(AuthError::new(ErrorCode::BadRequest, "authorization code is empty"));
        }
        let ctx = self.claim(session_id)?;

        if pasted_state.is_some_and(|s| s != ctx.state.state) {
            return fail(
                &self.deps,
                session_id,
                AuthError::new(ErrorCode::BadRequest, "state mismatch in pasted code"),
            );
        }

        let deps = self.deps.clone();
        let client = self.client.clone();
        let id = session_id.to_owned();
        let code = code.to_owned();
        run_detached(&self.deps, session_id, async move {
            let pkce = &ctx.state;
            let result = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    return Err(AuthError::new(
                        ErrorCode::InvalidTransition,
                        format!("session {id} ended during the exchange"),
                    ));
                }
                r = exchange_code(&deps.http, &client, &code, &pkce.state, &pkce.code_verifier) => r,
            };
            match result {
                Ok(token) => {
                    let creds = Credentials::from_token_response(&token, epoch_ms());
                    complete(&deps, &id, creds).await
                }
                Err(e) => fail(&deps, &id, e),
            }
        })
        .await
    }

    async fn accept_tokens(
        &self,
        session_id: &str,
        tokens: TokenBundle,
    ) -> Result<AuthSession, AuthError> {
        let creds = tokens.into_credentials(epoch_ms())?;
        let _ctx = self.claim(session_id)?;
        let deps = self.deps.clone();
        let id = session_id.to_owned();
        run_detached(&self.deps, session_id, async move { complete(&deps, &id, creds).await })
            .await
    }

    async fn refresh_credential(&self, session: &AuthSession) -> Result<u64, AuthError> {
        let target = session.target.clone().unwrap_or_else(RemoteTarget::local);
        let payload = self.deps.transfer.read(session.tool, &target).await?;
        let current = Credentials::parse_claude_file(&payload)?;
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::unsupported("credential has no refresh token"))?;

        let token = oauth::refresh(
            &self.deps.http,
            &self.client.token_url,
            &self.client.client_id,
            refresh_token,
        )
        .await?;
        let next = current.refreshed(&token, epoch_ms());
        self.deps.transfer.transfer(session.tool, &next.to_claude_file()?, &target).await?;
        info!(session_id = %session.id, target = %target, "credential refreshed");
        Ok(next.expires_at)
    }
}

/// Run the remainder of a claimed attempt on its own task.
///
/// The session leaves `exchanging` even when the caller's future is dropped.
async fn run_detached<F>(
    deps: &FlowDeps,
    session_id: &str,
    work: F,
) -> Result<AuthSession, AuthError>
where
    F: Future<Output = Result<AuthSession, AuthError>> + Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result,
        Err(e) => fail(deps, session_id, AuthError::internal(format!("exchange task aborted: {e}"))),
    }
}

/// Persist credentials to the session's target and complete the session.
async fn complete(
    deps: &FlowDeps,
    session_id: &str,
    creds: Credentials,
) -> Result<AuthSession, AuthError> {
    let session = deps.registry.get(session_id)?;
    let target = session.target.clone().unwrap_or_else(RemoteTarget::local);
    let payload = match creds.to_claude_file() {
        Ok(p) => p,
        Err(e) => return fail(deps, session_id, e),
    };

    match deps.transfer.transfer(session.tool, &payload, &target).await {
        Ok(result) => {
            let mut update = SessionUpdate::message(result.message);
            if creds.expires_at != 0 {
                update = update.with_expires_at(creds.expires_at);
            }
            let done = deps.registry.transition(session_id, SessionStatus::Completed, update)?;
            info!(session_id, tool = %session.tool, target = %target, "browser flow completed");
            Ok(done)
        }
        Err(e) => fail(deps, session_id, e),
    }
}

/// Record a driver-local failure on the session and hand the error back.
fn fail(deps: &FlowDeps, session_id: &str, err: AuthError) -> Result<AuthSession, AuthError> {
    warn!(session_id, err = %err, "browser flow failed");
    if let Err(e) = deps.registry.transition(
        session_id,
        SessionStatus::Failed,
        SessionUpdate::message(err.message.clone()),
    ) {
        debug!(session_id, err = %e, "could not record failure");
    }
    Err(err)
}

impl FlowDriver for BrowserDriver {
    fn tool(&self) -> Tool {
        Tool::Claude
    }

    fn start<'a>(&'a self, session: &'a AuthSession) -> FlowFuture<'a, AuthSession> {
        Box::pin(self.start_flow(session))
    }

    fn submit_code<'a>(
        &'a self,
        session_id: &'a str,
        code: &'a str,
    ) -> FlowFuture<'a, AuthSession> {
        Box::pin(self.exchange(session_id, code))
    }

    fn submit_tokens<'a>(
        &'a self,
        session_id: &'a str,
        tokens: TokenBundle,
    ) -> FlowFuture<'a, AuthSession> {
        Box::pin(self.accept_tokens(session_id, tokens))
    }

    fn cancel(&self, session_id: &str) {
        if let Some(ctx) = self.contexts.take(session_id) {
            ctx.cancel.cancel();
            debug!(session_id, "browser flow context released");
        }
        self.deps.relay.resolve(session_id);
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    fn refresh<'a>(&'a self, session: &'a AuthSession) -> FlowFuture<'a, u64> {
        Box::pin(self.refresh_credential(session))
    }
}

#[cfg(test)]
#[path = "browser_tests.rs"]
mod tests;
