// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket integration tests using real connections against an in-process
//! axum server.

mod support;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use authmux::session::Tool;

use support::{service, spawn_http_server, spawn_token_server, test_config};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsTx = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRx = futures_util::stream::SplitStream<WsStream>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn ws_send(stream: &mut WsTx, value: &serde_json::Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    stream.send(WsMessage::Text(text.into())).await.map_err(|e| anyhow::anyhow!("ws send: {e}"))?;
    Ok(())
}

async fn ws_recv(stream: &mut WsRx, timeout: Duration) -> anyhow::Result<serde_json::Value> {
    let msg = tokio::time::timeout(timeout, stream.next())
        .await
        .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
        .ok_or_else(|| anyhow::anyhow!("ws stream closed"))?
        .map_err(|e| anyhow::anyhow!("ws recv: {e}"))?;

    match msg {
        WsMessage::Text(text) => Ok(serde_json::from_str(&text)?),
        other => anyhow::bail!("expected Text message, got {other:?}"),
    }
}

/// Receive until a frame of the given `type` arrives.
async fn ws_recv_type(stream: &mut WsRx, kind: &str) -> anyhow::Result<serde_json::Value> {
    loop {
        let frame = ws_recv(stream, RECV_TIMEOUT).await?;
        if frame.get("type").and_then(|t| t.as_str()) == Some(kind) {
            return Ok(frame);
        }
    }
}

async fn ws_connect(addr: &std::net::SocketAddr, path: &str) -> anyhow::Result<(WsTx, WsRx)> {
    let url = format!("ws://{addr}{path}");
    let (stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .map_err(|e| anyhow::anyhow!("ws connect: {e}"))?;
    Ok(stream.split())
}

#[tokio::test]
async fn event_stream_receives_progress() -> anyhow::Result<()> {
    let home = tempfile::tempdir()?;
    let svc = service(test_config(&home))?;
    let addr = spawn_http_server(svc.clone()).await?;

    let (_tx, mut rx) = ws_connect(&addr, "/ws/events?session=*").await?;
    let session = svc.create_session(Tool::Claude, None).await?;

    let first = ws_recv_type(&mut rx, "progress").await?;
    assert_eq!(first["session"]["id"], session.id.as_str());
    assert_eq!(first["session"]["status"], "pending");

    let second = ws_recv_type(&mut rx, "progress").await?;
    assert_eq!(second["session"]["status"], "awaiting_browser");
    Ok(())
}

#[tokio::test]
async fn session_stream_backfills_snapshot() -> anyhow::Result<()> {
    let home = tempfile::tempdir()?;
    let svc = service(test_config(&home))?;
    let addr = spawn_http_server(svc.clone()).await?;
    let session = svc.create_session(Tool::Azure, None).await?;

    let (_tx, mut rx) = ws_connect(&addr, &format!("/ws/events?session={}", session.id)).await?;
    let snapshot = ws_recv_type(&mut rx, "progress").await?;
    assert_eq!(snapshot["session"]["status"], "awaiting_code");
    assert_eq!(snapshot["session"]["userCode"], "ABC-123");

    svc.cancel(&session.id)?;
    let cancelled = ws_recv_type(&mut rx, "progress").await?;
    assert_eq!(cancelled["session"]["status"], "cancelled");
    Ok(())
}

#[tokio::test]
async fn event_stream_for_unknown_session_is_refused() -> anyhow::Result<()> {
    let home = tempfile::tempdir()?;
    let addr = spawn_http_server(service(test_config(&home))?).await?;
    assert!(ws_connect(&addr, "/ws/events?session=missing").await.is_err());
    Ok(())
}

#[tokio::test]
async fn ws_requires_token_when_configured() -> anyhow::Result<()> {
    let home = tempfile::tempdir()?;
    let mut config = test_config(&home);
    config.auth_token = Some("test-secret".into());
    let addr = spawn_http_server(service(config)?).await?;

    assert!(ws_connect(&addr, "/ws/extension").await.is_err());
    assert!(ws_connect(&addr, "/ws/events?token=wrong").await.is_err());
    ws_connect(&addr, "/ws/extension?token=test-secret").await?;
    Ok(())
}

#[tokio::test]
async fn extension_gets_pending_url_and_completes_with_code() -> anyhow::Result<()> {
    let token_addr = spawn_token_server().await?;
    let home = tempfile::tempdir()?;
    let mut config = test_config(&home);
    config.claude_token_url = format!("http://{token_addr}/token");
    let svc = service(config)?;
    let addr = spawn_http_server(svc.clone()).await?;

    // Created before the extension connects; must be replayed.
    let session = svc.create_session(Tool::Claude, None).await?;

    let (mut tx, mut rx) = ws_connect(&addr, "/ws/extension").await?;
    let url = ws_recv_type(&mut rx, "auth_url").await?;
    assert_eq!(url["sessionId"], session.id.as_str());
    assert_eq!(url["url"], session.auth_url.as_deref().unwrap_or_default());
    assert!(url["codeVerifier"].as_str().is_some_and(|v| !v.is_empty()));

    ws_send(
        &mut tx,
        &serde_json::json!({"type": "auth_code", "sessionId": session.id, "code": "relayed"}),
    )
    .await?;
    let ack = ws_recv_type(&mut rx, "ack").await?;
    assert_eq!(ack["sessionId"], session.id.as_str());
    assert_eq!(ack["ok"], true);
    assert_eq!(svc.get(&session.id)?.status.as_str(), "completed");
    Ok(())
}

#[tokio::test]
async fn extension_tokens_complete_session_without_exchange() -> anyhow::Result<()> {
    let home = tempfile::tempdir()?;
    let svc = service(test_config(&home))?;
    let addr = spawn_http_server(svc.clone()).await?;
    let (mut tx, mut rx) = ws_connect(&addr, "/ws/extension").await?;

    let session = svc.create_session(Tool::Claude, None).await?;
    let pushed = ws_recv_type(&mut rx, "auth_url").await?;
    assert_eq!(pushed["sessionId"], session.id.as_str());

    ws_send(
        &mut tx,
        &serde_json::json!({
            "type": "auth_tokens",
            "sessionId": session.id,
            "tokens": {"accessToken": "sk-ant-relayed", "refreshToken": "rt", "expiresIn": 3600},
        }),
    )
    .await?;
    let ack = ws_recv_type(&mut rx, "ack").await?;
    assert_eq!(ack["ok"], true);

    let written = std::fs::read_to_string(home.path().join(".claude/.credentials.json"))?;
    assert!(written.contains("sk-ant-relayed"));
    Ok(())
}

#[tokio::test]
async fn extension_gets_negative_ack_for_bad_frames() -> anyhow::Result<()> {
    let home = tempfile::tempdir()?;
    let addr = spawn_http_server(service(test_config(&home))?).await?;
    let (mut tx, mut rx) = ws_connect(&addr, "/ws/extension").await?;

    ws_send(&mut tx, &serde_json::json!({"type": "auth_code", "sessionId": "ghost", "code": "c"}))
        .await?;
    let ack = ws_recv_type(&mut rx, "ack").await?;
    assert_eq!(ack["sessionId"], "ghost");
    assert_eq!(ack["ok"], false);

    ws_send(&mut tx, &serde_json::json!({"type": "hello"})).await?;
    let ack = ws_recv_type(&mut rx, "ack").await?;
    assert_eq!(ack["ok"], false);
    assert!(ack["message"].as_str().is_some_and(|m| m.starts_with("malformed frame")));
    Ok(())
}
