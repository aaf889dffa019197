// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::credential::Credentials;
use crate::events::GLOBAL_CHANNEL;
use crate::flow::browser::BrowserDriver;
use crate::flow::device::DeviceDriver;
use crate::flow::FlowDeps;
use crate::session::{SessionStatus, SessionUpdate, Tool};
use crate::test_support::{harness, mock_token_server, oauth_client, token_body, wait_for};

use super::*;

fn drivers(deps: &FlowDeps, token_url: &str) -> FlowDrivers {
    let device = |tool| {
        Arc::new(DeviceDriver::new(tool, "true".into(), Duration::from_secs(1), deps.clone()))
    };
    FlowDrivers::new(
        Arc::new(BrowserDriver::new(oauth_client(token_url), deps.clone())),
        device(Tool::Azure),
        device(Tool::Gcloud),
    )
}

fn monitor(deps: &FlowDeps, token_url: &str) -> ExpiryMonitor {
    ExpiryMonitor::new(
        Arc::clone(&deps.registry),
        Arc::clone(&deps.hub),
        drivers(deps, token_url),
        Duration::from_secs(60),
        Duration::from_secs(300),
        Duration::from_secs(3600),
    )
}

/// Walk a session to `completed` with a tracked credential expiry.
fn completed(deps: &FlowDeps, tool: Tool, expires_at: u64) -> anyhow::Result<String> {
    let s = deps.registry.create(tool, None);
    for status in
        [SessionStatus::AwaitingBrowser, SessionStatus::AwaitingCode, SessionStatus::Exchanging]
    {
        deps.registry.transition(&s.id, status, SessionUpdate::default())?;
    }
    deps.registry.transition(
        &s.id,
        SessionStatus::Completed,
        SessionUpdate::default().with_expires_at(expires_at),
    )?;
    Ok(s.id)
}

async fn seed_claude_file(deps: &FlowDeps, expires_at: u64) -> anyhow::Result<()> {
    let creds = Credentials {
        access_token: "sk-old".into(),
        refresh_token: Some("rt".into()),
        expires_at,
        scopes: Default::default(),
        subscription_type: None,
        rate_limit_tier: None,
    };
    deps.transfer.write_local(Tool::Claude, &creds.to_claude_file()?).await?;
    Ok(())
}

#[tokio::test]
async fn tick_expires_overdue_sessions_once() -> anyhow::Result<()> {
    let h = harness()?;
    let m = monitor(&h.deps, "http://127.0.0.1:1/token");
    let live = h.deps.registry.create(Tool::Claude, None);
    let deadline = live.expires_at.unwrap_or_default();

    assert!(m.tick_once(deadline - 1).await.expired.is_empty());
    assert_eq!(m.tick_once(deadline).await.expired, [live.id.clone()]);
    assert!(m.tick_once(deadline + 60_000).await.expired.is_empty());
    assert_eq!(h.deps.registry.get(&live.id)?.status, SessionStatus::Expired);
    Ok(())
}

#[tokio::test]
async fn spawned_monitor_expires_within_one_tick() -> anyhow::Result<()> {
    let h = harness()?;
    let deps = FlowDeps {
        registry: Arc::new(SessionRegistry::new(Arc::clone(&h.deps.hub), Duration::from_millis(50))),
        ..h.deps.clone()
    };
    let m = ExpiryMonitor::new(
        Arc::clone(&deps.registry),
        Arc::clone(&deps.hub),
        drivers(&deps, "http://127.0.0.1:1/token"),
        Duration::from_millis(100),
        Duration::from_secs(300),
        Duration::from_secs(3600),
    );
    let shutdown = CancellationToken::new();
    let handle = m.spawn(shutdown.clone());

    let s = deps.registry.create(Tool::Gcloud, None);
    let expired = wait_for(Duration::from_secs(2), || {
        deps.registry.get(&s.id).is_ok_and(|s| s.status == SessionStatus::Expired)
    })
    .await;
    assert!(expired);

    shutdown.cancel();
    handle.await?;
    Ok(())
}

#[tokio::test]
async fn refresh_updates_expiry_in_place() -> anyhow::Result<()> {
    let server = mock_token_server(vec![(200, token_body("sk-new", Some("rt2"), 3600))]).await?;
    let h = harness()?;
    let now = epoch_ms();
    seed_claude_file(&h.deps, now + 60_000).await?;
    let id = completed(&h.deps, Tool::Claude, now + 60_000)?;
    let m = monitor(&h.deps, &server.token_url());

    let report = m.tick_once(now).await;
    assert_eq!(report.refreshed, [id.clone()]);

    let session = h.deps.registry.get(&id)?;
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.expires_at.is_some_and(|at| at >= now + 3_600_000));
    let creds = Credentials::parse_claude_file(&h.deps.transfer.read_local(Tool::Claude).await?)?;
    assert_eq!(creds.access_token, "sk-new");
    Ok(())
}

#[tokio::test]
async fn credentials_outside_lookahead_are_left_alone() -> anyhow::Result<()> {
    let server = mock_token_server(vec![(200, token_body("sk-new", None, 3600))]).await?;
    let h = harness()?;
    let now = epoch_ms();
    completed(&h.deps, Tool::Claude, now + 3_600_000)?;
    let m = monitor(&h.deps, &server.token_url());

    assert!(m.tick_once(now).await.refreshed.is_empty());
    assert_eq!(server.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn refresh_failure_is_advisory() -> anyhow::Result<()> {
    let server = mock_token_server(vec![(401, r#"{"error":"invalid_grant"}"#.to_owned())]).await?;
    let h = harness()?;
    let now = epoch_ms();
    seed_claude_file(&h.deps, now + 10_000).await?;
    let id = completed(&h.deps, Tool::Claude, now + 10_000)?;
    let before = h.deps.registry.get(&id)?;
    let mut events = h.deps.hub.subscribe(GLOBAL_CHANNEL);
    let m = monitor(&h.deps, &server.token_url());

    let report = m.tick_once(now).await;
    assert_eq!(report.refresh_failed, [id.clone()]);
    assert_eq!(h.deps.registry.get(&id)?, before);

    match events.recv().await {
        Some(AuthEvent::TokenExpiring { session_id, tool, expires_at, error }) => {
            assert_eq!(session_id, id);
            assert_eq!(tool, Tool::Claude);
            assert_eq!(expires_at, now + 10_000);
            assert!(error.contains("invalid_grant"));
        }
        other => anyhow::bail!("expected token_expiring, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn device_sessions_are_not_refreshed() -> anyhow::Result<()> {
    let h = harness()?;
    let now = epoch_ms();
    completed(&h.deps, Tool::Azure, now + 1_000)?;
    let m = monitor(&h.deps, "http://127.0.0.1:1/token");
    let report = m.tick_once(now).await;
    assert!(report.refreshed.is_empty());
    assert!(report.refresh_failed.is_empty());
    Ok(())
}

#[tokio::test]
async fn tick_collects_old_terminal_sessions() -> anyhow::Result<()> {
    let h = harness()?;
    let s = h.deps.registry.create(Tool::Azure, None);
    h.deps.registry.transition(&s.id, SessionStatus::Failed, SessionUpdate::default())?;
    let m = monitor(&h.deps, "http://127.0.0.1:1/token");

    assert_eq!(m.tick_once(epoch_ms()).await.collected, 0);
    assert_eq!(m.tick_once(epoch_ms() + 3_600_001).await.collected, 1);
    assert!(h.deps.registry.is_empty());
    Ok(())
}
