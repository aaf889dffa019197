// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth authorization code + PKCE (RFC 7636) helpers.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::AuthError;
use crate::flow::oauth::{post_token_request, TokenResponse};

/// Generate a PKCE code verifier (43-128 char URL-safe random string).
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute code_challenge = base64url_nopad(sha256(verifier)).
pub fn compute_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate a random state parameter (32 bytes → 43 chars).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Endpoints and client identity for an authorization-code flow.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
}

/// Build the full authorization URL with PKCE parameters.
///
/// Parameter order matches the Claude CLI.
pub fn build_auth_url(client: &OAuthClient, code_challenge: &str, state: &str) -> String {
    format!(
        "{auth_url}?code=true\
         &client_id={client_id}\
         &response_type=code\
         &redirect_uri={redirect_uri}\
         &scope={scope}\
         &code_challenge={code_challenge}\
         &code_challenge_method=S256\
         &state={state}",
        auth_url = client.authorize_url,
        client_id = urlencoding(&client.client_id),
        redirect_uri = urlencoding(&client.redirect_uri),
        scope = urlencoding(&client.scope),
        code_challenge = urlencoding(code_challenge),
        state = urlencoding(state),
    )
}

/// Split a pasted callback code of the form `code#state`.
pub fn split_code_state(raw: &str) -> (&str, Option<&str>) {
    match raw.trim().split_once('#') {
        Some((code, state)) if !state.is_empty() => (code, Some(state)),
        Some((code, _)) => (code, None),
        None => (raw.trim(), None),
    }
}

/// Exchange an authorization code for tokens (JSON body).
pub async fn exchange_code(
    http: &reqwest::Client,
    client: &OAuthClient,
    code: &str,
    state: &str,
    code_verifier: &str,
) -> Result<TokenResponse, AuthError> {
    let body = serde_json::json!({
        "grant_type": "authorization_code",
        "client_id": client.client_id,
        "code": code,
        "state": state,
        "redirect_uri": client.redirect_uri,
        "code_verifier": code_verifier,
    });
    post_token_request(http, &client.token_url, &body).await
}

/// Form-style encoding for URL query parameters (spaces as `+`).
fn urlencoding(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push(char::from(HEX[(b >> 4) as usize]));
                out.push(char::from(HEX[(b & 0xf) as usize]));
            }
        }
    }
    out
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

#[cfg(test)]
#[path = "pkce_tests.rs"]
mod tests;
