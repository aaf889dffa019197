// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dashboard event stream over WebSocket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::error::AuthError;
use crate::events::{AuthEvent, Delivery, Subscription, GLOBAL_CHANNEL};
use crate::service::AuthService;
use crate::transport::auth;

/// Query parameters for `/ws/events`.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub token: Option<String>,
    /// Session id, or `*` for every session.
    #[serde(default = "default_session")]
    pub session: String,
}

fn default_session() -> String {
    GLOBAL_CHANNEL.to_owned()
}

/// `GET /ws/events`: WebSocket upgrade for session events.
pub async fn events_handler(
    State(service): State<Arc<AuthService>>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Err(e) =
        auth::validate_ws_token(query.token.as_deref(), service.config.auth_token.as_deref())
    {
        return e.into_response();
    }

    let (sub, snapshot) = match open_stream(&service, &query.session) {
        Ok(opened) => opened,
        Err(e) => return e.into_response(),
    };
    ws.on_upgrade(move |socket| handle_events(service, sub, snapshot, socket)).into_response()
}

/// Subscribe to `channel`, then read the snapshot to backfill a
/// single-session stream. Any transition after the snapshot is on `sub`.
pub fn open_stream(
    service: &AuthService,
    channel: &str,
) -> Result<(Subscription, Option<AuthEvent>), AuthError> {
    let sub = service.hub.subscribe(channel);
    if channel == GLOBAL_CHANNEL {
        return Ok((sub, None));
    }
    let session = service.get(channel)?;
    Ok((sub, Some(AuthEvent::Progress { session })))
}

fn encode(delivery: &Delivery) -> Option<String> {
    match delivery {
        Delivery::Event(event) => serde_json::to_string(event).ok(),
        Delivery::Lagged(missed) => {
            Some(serde_json::json!({ "type": "lagged", "missed": missed }).to_string())
        }
    }
}

/// Per-connection event loop.
async fn handle_events(
    service: Arc<AuthService>,
    mut sub: Subscription,
    snapshot: Option<AuthEvent>,
    socket: WebSocket,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    if let Some(text) = snapshot.map(Delivery::Event).as_ref().and_then(encode) {
        if ws_tx.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = service.shutdown.cancelled() => break,
            delivery = sub.next() => {
                let Some(delivery) = delivery else { break };
                if let Delivery::Lagged(missed) = delivery {
                    tracing::debug!(channel = %sub.channel(), missed, "event subscriber lagged");
                }
                if let Some(text) = encode(&delivery) {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    let _ = ws_tx.send(Message::Close(None)).await;
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
