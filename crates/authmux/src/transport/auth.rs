// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::{AuthError, ErrorCode};
use crate::service::AuthService;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

fn unauthorized() -> AuthError {
    AuthError::new(ErrorCode::Unauthorized, "unauthorized")
}

/// Validate a Bearer token from HTTP headers. Always passes when no token is
/// configured.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), AuthError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(unauthorized())
    }
}

/// Validate the `token` query parameter of a WebSocket upgrade.
pub fn validate_ws_token(token: Option<&str>, expected: Option<&str>) -> Result<(), AuthError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    match token {
        Some(t) if constant_time_eq(t, expected) => Ok(()),
        _ => Err(unauthorized()),
    }
}

/// Axum middleware that enforces Bearer token authentication.
///
/// Exempt: `/health` and WebSocket upgrades (`/ws/`), which check `?token=`
/// themselves.
pub async fn auth_layer(
    State(service): State<Arc<AuthService>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/health" || path.starts_with("/ws/") {
        return next.run(req).await;
    }

    if let Err(e) = validate_bearer(req.headers(), service.config.auth_token.as_deref()) {
        tracing::debug!(path, "rejected unauthenticated request");
        return e.into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
