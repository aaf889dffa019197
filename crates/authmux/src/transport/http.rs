// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the session API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::service::AuthService;
use crate::session::{AuthSession, Tool};
use crate::transfer::{RemoteTarget, SyncDirection};

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_sessions: usize,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub tool: String,
    #[serde(default)]
    pub target: Option<RemoteTarget>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitCodeRequest {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<AuthSession>,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub tool: String,
    pub direction: SyncDirection,
    pub target: RemoteTarget,
}

fn parse_tool(raw: &str) -> Result<Tool, axum::response::Response> {
    raw.parse::<Tool>()
        .map_err(|e| ErrorCode::BadRequest.to_http_response(e).into_response())
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health`
pub async fn health(State(s): State<Arc<AuthService>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        active_sessions: s.registry.list_active().len(),
    })
}

/// `POST /sessions`: create a session and start its flow.
pub async fn create_session(
    State(s): State<Arc<AuthService>>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    let tool = match parse_tool(&req.tool) {
        Ok(tool) => tool,
        Err(resp) => return resp,
    };
    match s.create_session(tool, req.target).await {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => {
            tracing::warn!(tool = %tool, err = %e, "session start failed");
            e.into_response()
        }
    }
}

/// `GET /sessions`
pub async fn list_sessions(State(s): State<Arc<AuthService>>) -> impl IntoResponse {
    Json(s.list())
}

/// `GET /sessions/{id}`
pub async fn get_session(
    State(s): State<Arc<AuthService>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.get(&id) {
        Ok(session) => Json(session).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /sessions/{id}/submit-code`
pub async fn submit_code(
    State(s): State<Arc<AuthService>>,
    Path(id): Path<String>,
    Json(req): Json<SubmitCodeRequest>,
) -> impl IntoResponse {
    match s.submit_code(&id, &req.code).await {
        Ok(session) => Json(MessageResponse {
            message: format!("session {}", session.status),
            session: Some(session),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /sessions/{id}/cancel`
pub async fn cancel_session(
    State(s): State<Arc<AuthService>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.cancel(&id) {
        Ok(true) => {
            Json(MessageResponse { message: "session cancelled".to_owned(), session: s.get(&id).ok() })
                .into_response()
        }
        Ok(false) => {
            let session = s.get(&id).ok();
            let status = session.as_ref().map(|s| s.status.as_str()).unwrap_or("removed");
            Json(MessageResponse { message: format!("session already {status}"), session })
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// `GET /auth/status`
pub async fn auth_status(State(s): State<Arc<AuthService>>) -> impl IntoResponse {
    Json(s.auth_status().await)
}

/// `POST /credentials/sync`
pub async fn sync_credentials(
    State(s): State<Arc<AuthService>>,
    Json(req): Json<SyncRequest>,
) -> impl IntoResponse {
    let tool = match parse_tool(&req.tool) {
        Ok(tool) => tool,
        Err(resp) => return resp,
    };
    match s.sync(tool, req.direction, &req.target).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            tracing::warn!(tool = %tool, target = %req.target.key(), err = %e, "credential sync failed");
            e.into_response()
        }
    }
}
