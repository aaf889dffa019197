// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent browser-extension channel.
//!
//! Pending `auth_url` frames are replayed on connect; new ones are forwarded
//! as they are pushed. Each inbound `auth_code` / `auth_tokens` frame is
//! dispatched to the session's driver and answered with an `ack`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::relay::{RelayInbound, RelayOutbound};
use crate::service::AuthService;
use crate::transport::auth;

#[derive(Debug, Deserialize)]
pub struct ExtensionQuery {
    pub token: Option<String>,
}

/// `GET /ws/extension`
pub async fn extension_handler(
    State(service): State<Arc<AuthService>>,
    Query(query): Query<ExtensionQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Err(e) =
        auth::validate_ws_token(query.token.as_deref(), service.config.auth_token.as_deref())
    {
        return e.into_response();
    }
    ws.on_upgrade(move |socket| handle_extension(service, socket)).into_response()
}

async fn handle_extension(service: Arc<AuthService>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Subscribe before snapshotting so nothing pushed in between is lost.
    let mut relay_rx = service.relay.subscribe();
    let pending = service.relay.pending();
    tracing::info!(pending = pending.len(), "extension connected");
    for frame in &pending {
        if send(&mut ws_tx, frame).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = service.shutdown.cancelled() => break,
            frame = relay_rx.recv() => {
                let frame = match frame {
                    Ok(f) => f,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "extension relay lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if pending.contains(&frame) {
                    continue;
                }
                if send(&mut ws_tx, &frame).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => continue,
                };
                let reply = match serde_json::from_str::<RelayInbound>(&text) {
                    Ok(inbound) => service.handle_extension(inbound).await,
                    Err(e) => {
                        tracing::debug!(err = %e, "malformed extension frame");
                        RelayOutbound::Ack {
                            session_id: String::new(),
                            ok: false,
                            message: format!("malformed frame: {e}"),
                        }
                    }
                };
                if send(&mut ws_tx, &reply).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!("extension disconnected");
}

async fn send<S>(ws_tx: &mut S, frame: &RelayOutbound) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    ws_tx.send(Message::Text(json.into())).await.map_err(|_| ())
}
