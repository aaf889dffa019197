// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth token endpoint types and the refresh grant.

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Standard OAuth2 token response.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Space-separated granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// OAuth error response body.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// POST a JSON body to a token endpoint and decode the token response.
///
/// Every failure (connect, non-2xx, undecodable body) is a transport error.
pub async fn post_token_request(
    client: &reqwest::Client,
    token_url: &str,
    body: &serde_json::Value,
) -> Result<TokenResponse, AuthError> {
    let resp = client
        .post(token_url)
        .header("Content-Type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .map_err(|e| AuthError::transport(format!("token request failed: {e}")))?;

    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| AuthError::transport(format!("token response unreadable: {e}")))?;

    if !status.is_success() {
        if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&text) {
            return Err(AuthError::transport(format!(
                "token exchange failed ({status}): {} {}",
                err.error,
                err.error_description.unwrap_or_default()
            )));
        }
        return Err(AuthError::transport(format!("token exchange failed ({status}): {text}")));
    }

    serde_json::from_str::<TokenResponse>(&text)
        .map_err(|e| AuthError::transport(format!("invalid token response: {e}")))
}

/// Perform a single refresh-token grant.
pub async fn refresh(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    refresh_token: &str,
) -> Result<TokenResponse, AuthError> {
    let body = serde_json::json!({
        "grant_type": "refresh_token",
        "client_id": client_id,
        "refresh_token": refresh_token,
    });
    post_token_request(client, token_url, &body).await
}
