// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote credential writes over `ssh` or `docker exec`.
//!
//! Each operation is one short-lived transport process running a small POSIX
//! shell script on the far side. The payload travels over stdin.

use std::process::Stdio;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{AuthError, ErrorCode};
use crate::transfer::{RemoteTarget, TargetKind};

/// `ssh` exits with 255 when the connection itself failed.
const SSH_CONNECTION_FAILED: i32 = 255;

/// Output of one remote script run.
#[derive(Debug)]
struct RemoteOutput {
    code: Option<i32>,
    stdout: Vec<u8>,
    stderr: String,
}

/// A transport session to one remote target.
pub struct RemoteShell {
    target: RemoteTarget,
    program: String,
    timeout: Duration,
}

impl RemoteShell {
    pub fn new(target: RemoteTarget, program: String, timeout: Duration) -> Self {
        Self { target, program, timeout }
    }

    /// Write `payload` to `$HOME/<rel>` via temp file + rename. Each call gets
    /// its own `mktemp` file beside the destination.
    pub async fn write_file(&self, rel: &str, payload: &[u8]) -> Result<(), AuthError> {
        let dest = format!("\"$HOME\"/{}", shell_quote(rel));
        let script = format!(
            "set -e; umask 077; dir=\"$(dirname {dest})\"; mkdir -p \"$dir\"; \
             tmp=\"$(mktemp \"$dir/.authmux.XXXXXX\")\"; trap 'rm -f \"$tmp\"' EXIT; \
             cat > \"$tmp\"; chmod 600 \"$tmp\"; mv -f \"$tmp\" {dest}; trap - EXIT"
        );
        let out = self.run(&script, Some(payload)).await?;
        if out.code == Some(0) {
            return Ok(());
        }
        Err(AuthError::write_denied(format!(
            "remote write to ~/{rel} on {} failed: {}",
            self.target,
            out.stderr.trim()
        )))
    }

    /// Read `$HOME/<rel>` back in full.
    pub async fn read_file(&self, rel: &str) -> Result<Vec<u8>, AuthError> {
        let script = format!("cat \"$HOME\"/{}", shell_quote(rel));
        let out = self.run(&script, None).await?;
        if out.code == Some(0) {
            return Ok(out.stdout);
        }
        Err(AuthError::new(
            ErrorCode::NotFound,
            format!("cannot read ~/{rel} on {}: {}", self.target, out.stderr.trim()),
        ))
    }

    /// Compare the remote file's SHA-256 with the payload that was sent.
    pub async fn verify_checksum(&self, rel: &str, payload: &[u8]) -> Result<(), AuthError> {
        let expected = hex_digest(payload);
        let script = format!(
            "f=\"$HOME\"/{}; (sha256sum \"$f\" 2>/dev/null || shasum -a 256 \"$f\") | cut -d' ' -f1",
            shell_quote(rel)
        );
        let out = self.run(&script, None).await?;
        let actual = String::from_utf8_lossy(&out.stdout).trim().to_owned();
        if out.code == Some(0) && actual == expected {
            return Ok(());
        }
        Err(AuthError::new(
            ErrorCode::VerificationFailed,
            format!(
                "checksum mismatch for ~/{rel} on {}: expected {expected}, got {}",
                self.target,
                if actual.is_empty() { out.stderr.trim() } else { actual.as_str() }
            ),
        ))
    }

    /// Build the transport command for this target.
    fn command(&self, script: &str) -> Command {
        match self.target.kind {
            TargetKind::Docker => {
                let (bin, leading) = self.program_parts("docker");
                let mut cmd = Command::new(bin);
                cmd.args(leading).arg("exec").arg("-i");
                if let Some(ref user) = self.target.user {
                    cmd.arg("-u").arg(user);
                }
                cmd.arg(self.target.container.as_deref().unwrap_or_default());
                cmd.args(["sh", "-c", script]);
                cmd
            }
            _ => {
                let (bin, leading) = self.program_parts("ssh");
                let mut cmd = match self.target.password {
                    Some(ref password) => {
                        let mut cmd = Command::new("sshpass");
                        cmd.env("SSHPASS", password).arg("-e").arg(bin).args(leading);
                        cmd
                    }
                    None => {
                        let mut cmd = Command::new(bin);
                        cmd.args(leading).args(["-o", "BatchMode=yes"]);
                        cmd
                    }
                };
                cmd.args(["-o", "ConnectTimeout=10", "-o", "StrictHostKeyChecking=accept-new"]);
                if let Some(port) = self.target.port {
                    cmd.arg("-p").arg(port.to_string());
                }
                if let Some(ref key) = self.target.identity_file {
                    cmd.arg("-i").arg(key);
                }
                let host = self.target.host.as_deref().unwrap_or_default();
                let dest = match self.target.user {
                    Some(ref user) => format!("{user}@{host}"),
                    None => host.to_owned(),
                };
                cmd.arg(dest).arg(format!("sh -c {}", shell_quote(script)));
                cmd
            }
        }
    }

    /// Split the configured program into binary and leading arguments.
    fn program_parts<'a>(&'a self, fallback: &'a str) -> (&'a str, Vec<&'a str>) {
        let mut parts = self.program.split_whitespace();
        let bin = parts.next().unwrap_or(fallback);
        (bin, parts.collect())
    }

    async fn run(&self, script: &str, stdin: Option<&[u8]>) -> Result<RemoteOutput, AuthError> {
        let mut cmd = self.command(script);
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            AuthError::transport(format!("cannot start `{}` for {}: {e}", self.program, self.target))
        })?;

        if let (Some(payload), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(payload).await.map_err(|e| {
                AuthError::transport(format!("write to {} failed: {e}", self.target))
            })?;
            // Close stdin so the remote `cat` sees EOF.
            drop(pipe);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(AuthError::transport(format!("{} failed: {e}", self.target)));
            }
            Err(_) => {
                return Err(AuthError::new(
                    ErrorCode::TransportError,
                    format!("{} timed out after {:?}", self.target, self.timeout),
                ));
            }
        };

        let out = RemoteOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if self.is_transport_failure(&out) {
            return Err(AuthError::transport(format!(
                "{} unreachable: {}",
                self.target,
                out.stderr.trim()
            )));
        }
        Ok(out)
    }

    /// Distinguish "could not reach the target" from "script failed there".
    fn is_transport_failure(&self, out: &RemoteOutput) -> bool {
        match self.target.kind {
            TargetKind::Docker => {
                let stderr = out.stderr.to_lowercase();
                out.code.is_none()
                    || stderr.contains("no such container")
                    || stderr.contains("cannot connect to the docker daemon")
                    || stderr.contains("is not running")
            }
            _ => out.code.is_none() || out.code == Some(SSH_CONNECTION_FAILED),
        }
    }
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Lowercase hex SHA-256.
pub fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
