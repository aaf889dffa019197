// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device-code flow driven by the tool's own login subprocess.
//!
//! The CLI is spawned in its own process group. Its stdout and stderr are
//! streamed to subscribers as `output` events and scanned for a "visit URL,
//! enter code" prompt. Once the prompt is seen a watcher task owns the child
//! and maps its exit status onto the session; nothing is ever submitted to
//! the CLI.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AuthError, ErrorCode};
use crate::events::{AuthEvent, NotificationHub};
use crate::flow::device_parse::{DevicePrompt, PromptPatterns, PromptScanner};
use crate::flow::{FlowContext, FlowContexts, FlowDeps, FlowDriver, FlowFuture, TokenBundle};
use crate::session::{AuthSession, SessionStatus, SessionUpdate, Tool};
use crate::transfer::SyncDirection;

/// Per-session subprocess bookkeeping.
#[derive(Debug, Default)]
pub struct DeviceState {
    /// Child pid, which is also its process group id.
    pub pid: Option<u32>,
}

/// How the prompt scan ended.
enum ScanOutcome {
    Prompt(DevicePrompt),
    /// Both output streams closed first (the process exited).
    Closed,
    Cancelled,
}

/// Flow driver for CLIs that print a device-login URL and user code.
pub struct DeviceDriver {
    tool: Tool,
    command: String,
    url_timeout: Duration,
    deps: FlowDeps,
    contexts: Arc<FlowContexts<DeviceState>>,
}

impl DeviceDriver {
    pub fn new(tool: Tool, command: String, url_timeout: Duration, deps: FlowDeps) -> Self {
        Self { tool, command, url_timeout, deps, contexts: Arc::new(FlowContexts::default()) }
    }

    /// Pid of the session's login subprocess while it is tracked.
    pub fn child_pid(&self, session_id: &str) -> Option<u32> {
        self.contexts.with(session_id, |ctx| ctx.state.pid).flatten()
    }

    pub fn has_context(&self, session_id: &str) -> bool {
        self.contexts.contains(session_id)
    }

    /// Spawn and scan on a task of its own. The session reaches
    /// `awaiting_code` or `failed` even if the caller stops waiting.
    async fn start_flow(&self, session: &AuthSession) -> Result<AuthSession, AuthError> {
        let launch = Launch {
            tool: self.tool,
            command: self.command.clone(),
            url_timeout: self.url_timeout,
            deps: self.deps.clone(),
            contexts: Arc::clone(&self.contexts),
        };
        let id = session.id.clone();
        match tokio::spawn(launch.run(id.clone())).await {
            Ok(result) => result,
            Err(e) => {
                if let Some(ctx) = self.contexts.take(&id) {
                    kill_group(ctx.state.pid);
                }
                fail_start(
                    &self.deps,
                    self.tool,
                    &id,
                    AuthError::internal(format!("device login task aborted: {e}")),
                )
            }
        }
    }
}

/// One login subprocess from spawn until its prompt is published.
struct Launch {
    tool: Tool,
    command: String,
    url_timeout: Duration,
    deps: FlowDeps,
    contexts: Arc<FlowContexts<DeviceState>>,
}

impl Launch {
    async fn run(self, id: String) -> Result<AuthSession, AuthError> {
        let patterns = match PromptPatterns::compile() {
            Ok(patterns) => patterns,
            Err(e) => {
                return self.fail_start(
                    &id,
                    AuthError::internal(format!("device prompt patterns do not compile: {e}")),
                );
            }
        };
        let cancel = self.deps.registry.cancel_token(&id)?.child_token();
        self.contexts
            .insert(&id, FlowContext { cancel: cancel.clone(), state: DeviceState::default() })?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.command);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // Own process group so the whole CLI tree can be signalled at once.
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.contexts.take(&id);
                return self.fail_start(
                    &id,
                    AuthError::internal(format!("cannot start `{}`: {e}", self.command)),
                );
            }
        };
        let pid = child.id();
        self.contexts.with(&id, |ctx| ctx.state.pid = pid);
        info!(session_id = %id, tool = %self.tool, pid = ?pid, "device login started");

        let (line_tx, line_rx) = mpsc::channel(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(
                stdout,
                id.clone(),
                Arc::clone(&self.deps.hub),
                line_tx.clone(),
                cancel.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(
                stderr,
                id.clone(),
                Arc::clone(&self.deps.hub),
                line_tx,
                cancel.clone(),
            ));
        }

        let mut scanner = PromptScanner::new(&patterns);
        let outcome =
            tokio::time::timeout(self.url_timeout, scan(&mut scanner, line_rx, &cancel)).await;
        let prompt = match outcome {
            Ok(ScanOutcome::Prompt(prompt)) => prompt,
            Ok(ScanOutcome::Cancelled) => {
                self.abort(&id, pid, &mut child).await;
                return Err(AuthError::new(
                    ErrorCode::InvalidTransition,
                    format!("session {id} ended before a device code appeared"),
                ));
            }
            Ok(ScanOutcome::Closed) => {
                let status = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
                self.abort(&id, pid, &mut child).await;
                let status = match status {
                    Ok(Ok(s)) => s.to_string(),
                    _ => "unknown status".to_owned(),
                };
                return self.fail_start(
                    &id,
                    AuthError::internal(format!(
                        "`{}` exited ({status}) before printing a device code",
                        self.command
                    )),
                );
            }
            Err(_) => {
                self.abort(&id, pid, &mut child).await;
                let message = match scanner.url() {
                    Some(url) => format!(
                        "`{}` printed login URL {url} but no user code within {}s; \
                         interactive code entry is not supported",
                        self.command,
                        self.url_timeout.as_secs()
                    ),
                    None => format!(
                        "no device login URL and code in `{}` output within {}s",
                        self.command,
                        self.url_timeout.as_secs()
                    ),
                };
                return self.fail_start(&id, AuthError::new(ErrorCode::Timeout, message));
            }
        };

        let session = match self.publish_prompt(&id, &prompt) {
            Ok(session) => session,
            Err(e) => {
                self.abort(&id, pid, &mut child).await;
                return Err(e);
            }
        };
        info!(session_id = %id, url = %prompt.url, "device code ready");

        let watcher = Watcher {
            tool: self.tool,
            session_id: id,
            deps: self.deps,
            contexts: self.contexts,
        };
        tokio::spawn(watcher.run(child, pid, cancel));
        Ok(session)
    }

    /// `pending -> awaiting_browser -> awaiting_code` with the prompt fields.
    fn publish_prompt(&self, id: &str, prompt: &DevicePrompt) -> Result<AuthSession, AuthError> {
        let registry = &self.deps.registry;
        let update = SessionUpdate {
            auth_url: Some(prompt.url.clone()),
            user_code: Some(prompt.user_code.clone()),
            message: Some(format!("open {} and enter code {}", prompt.url, prompt.user_code)),
            expires_at: None,
        };
        registry.transition(id, SessionStatus::AwaitingBrowser, update)?;
        registry.transition(id, SessionStatus::AwaitingCode, SessionUpdate::default())
    }

    /// Kill the process group, reap the child, and drop the context.
    async fn abort(&self, id: &str, pid: Option<u32>, child: &mut Child) {
        kill_group(pid);
        let _ = child.kill().await;
        self.contexts.take(id);
    }

    fn fail_start(&self, id: &str, err: AuthError) -> Result<AuthSession, AuthError> {
        fail_start(&self.deps, self.tool, id, err)
    }
}

fn fail_start(
    deps: &FlowDeps,
    tool: Tool,
    id: &str,
    err: AuthError,
) -> Result<AuthSession, AuthError> {
    warn!(session_id = %id, tool = %tool, err = %err, "device login failed to start");
    if let Err(e) =
        deps.registry.transition(id, SessionStatus::Failed, SessionUpdate::message(&err.message))
    {
        debug!(session_id = %id, err = %e, "could not record failure");
    }
    Err(err)
}

impl FlowDriver for DeviceDriver {
    fn tool(&self) -> Tool {
        self.tool
    }

    fn start<'a>(&'a self, session: &'a AuthSession) -> FlowFuture<'a, AuthSession> {
        Box::pin(self.start_flow(session))
    }

    fn submit_code<'a>(
        &'a self,
        _session_id: &'a str,
        _code: &'a str,
    ) -> FlowFuture<'a, AuthSession> {
        let tool = self.tool;
        Box::pin(async move {
            Err(AuthError::unsupported(format!(
                "{tool} uses a device-code flow and accepts no authorization code"
            )))
        })
    }

    fn submit_tokens<'a>(
        &'a self,
        _session_id: &'a str,
        _tokens: TokenBundle,
    ) -> FlowFuture<'a, AuthSession> {
        let tool = self.tool;
        Box::pin(async move {
            Err(AuthError::unsupported(format!(
                "{tool} uses a device-code flow and accepts no relayed tokens"
            )))
        })
    }

    fn cancel(&self, session_id: &str) {
        if let Some(ctx) = self.contexts.take(session_id) {
            kill_group(ctx.state.pid);
            ctx.cancel.cancel();
            debug!(session_id, pid = ?ctx.state.pid, "device login terminated");
        }
    }
}

/// Owns the child once the prompt has been published.
struct Watcher {
    tool: Tool,
    session_id: String,
    deps: FlowDeps,
    contexts: Arc<FlowContexts<DeviceState>>,
}

impl Watcher {
    async fn run(self, mut child: Child, pid: Option<u32>, cancel: CancellationToken) {
        let id = self.session_id.as_str();
        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                kill_group(pid);
                let _ = child.kill().await;
                self.contexts.take(id);
                debug!(session_id = %id, "device watcher cancelled");
                return;
            }
        };
        self.contexts.take(id);

        let result = match status {
            Ok(s) if s.success() => self.finish().await,
            Ok(s) => Err(AuthError::transport(format!("{} login exited with {s}", self.tool))),
            Err(e) => Err(AuthError::internal(format!("cannot wait on {} login: {e}", self.tool))),
        };
        if let Err(e) = result {
            warn!(session_id = %id, tool = %self.tool, err = %e, "device login failed");
            self.record(SessionStatus::Exchanging, SessionUpdate::default());
            self.record(SessionStatus::Failed, SessionUpdate::message(e.message));
        }
    }

    /// Exit 0: the CLI has written its own credential cache locally.
    /// Remote targets get a copy.
    async fn finish(&self) -> Result<(), AuthError> {
        let registry = &self.deps.registry;
        let session = registry.transition(
            &self.session_id,
            SessionStatus::Exchanging,
            SessionUpdate::message("device login finished"),
        )?;
        let message = match session.target {
            Some(ref target) if !target.is_local() => {
                let result =
                    self.deps.transfer.sync(self.tool, SyncDirection::Push, target).await?;
                result.message
            }
            _ => format!("{} login completed", self.tool),
        };
        registry.transition(
            &self.session_id,
            SessionStatus::Completed,
            SessionUpdate::message(message),
        )?;
        info!(session_id = %self.session_id, tool = %self.tool, "device login completed");
        Ok(())
    }

    /// Best-effort transition; a session that moved on meanwhile is fine.
    fn record(&self, status: SessionStatus, update: SessionUpdate) {
        if let Err(e) = self.deps.registry.transition(&self.session_id, status, update) {
            debug!(session_id = %self.session_id, to = %status, err = %e, "transition skipped");
        }
    }
}

/// Wait for the scanner to recognise a prompt.
async fn scan(
    scanner: &mut PromptScanner<'_>,
    mut lines: mpsc::Receiver<String>,
    cancel: &CancellationToken,
) -> ScanOutcome {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return ScanOutcome::Cancelled,
            line = lines.recv() => match line {
                Some(line) => {
                    if let Some(prompt) = scanner.feed(&line) {
                        return ScanOutcome::Prompt(prompt);
                    }
                }
                None => return ScanOutcome::Closed,
            },
        }
    }
}

/// Forward subprocess output as `output` events and to the prompt scanner.
async fn pump_lines<R: AsyncRead + Unpin>(
    reader: R,
    session_id: String,
    hub: Arc<NotificationHub>,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                hub.publish(AuthEvent::Output { session_id: session_id.clone(), data: line.clone() });
                if !tx.is_closed() {
                    let _ = tx.send(line).await;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(session_id = %session_id, err = %e, "output stream error");
                break;
            }
        }
    }
}

/// SIGKILL a process group. The group may already be gone.
fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!(pgid = pid, err = %e, "killpg failed");
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
