// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential transfer: durable writes of credential payloads to the local
//! filesystem, an SSH host, or a container.
//!
//! Payloads are opaque bytes. Every write lands in a temp file next to the
//! destination and is renamed into place, locally and remotely, so a reader
//! never observes a partial file. Nothing here retries; callers re-invoke.

pub mod local;
pub mod remote;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credential::relative_path;
use crate::error::{AuthError, ErrorCode};
use crate::session::Tool;
use crate::transfer::remote::RemoteShell;

/// Kind of credential destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Local,
    Ssh,
    Docker,
}

/// Read-only descriptor of where a credential payload should be written.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTarget {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Path to an SSH private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
    /// SSH password. Accepted on input, never echoed back.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Container name or id for docker targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl RemoteTarget {
    pub fn local() -> Self {
        Self {
            kind: TargetKind::Local,
            host: None,
            port: None,
            user: None,
            identity_file: None,
            password: None,
            container: None,
        }
    }

    pub fn ssh(host: impl Into<String>) -> Self {
        Self { kind: TargetKind::Ssh, host: Some(host.into()), ..Self::local() }
    }

    pub fn docker(container: impl Into<String>) -> Self {
        Self { kind: TargetKind::Docker, container: Some(container.into()), ..Self::local() }
    }

    pub fn is_local(&self) -> bool {
        self.kind == TargetKind::Local
    }

    /// Check that the fields required by the target kind are present.
    pub fn validate(&self) -> Result<(), AuthError> {
        match self.kind {
            TargetKind::Local => Ok(()),
            TargetKind::Ssh => match self.host.as_deref() {
                Some(h) if !h.trim().is_empty() => Ok(()),
                _ => Err(AuthError::new(ErrorCode::BadRequest, "ssh target requires a host")),
            },
            TargetKind::Docker => match self.container.as_deref() {
                Some(c) if !c.trim().is_empty() => Ok(()),
                _ => Err(AuthError::new(
                    ErrorCode::BadRequest,
                    "docker target requires a container",
                )),
            },
        }
    }

    /// Stable identity used to group sessions writing to the same place.
    pub fn key(&self) -> String {
        match self.kind {
            TargetKind::Local => "local".to_owned(),
            TargetKind::Ssh => format!(
                "ssh:{}@{}:{}",
                self.user.as_deref().unwrap_or(""),
                self.host.as_deref().unwrap_or(""),
                self.port.unwrap_or(22)
            ),
            TargetKind::Docker => format!("docker:{}", self.container.as_deref().unwrap_or("")),
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// Hand-written so passwords stay out of logs.
impl fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("identity_file", &self.identity_file)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("container", &self.container)
            .finish()
    }
}

/// How a payload was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    Local,
    Ssh,
    Docker,
}

impl From<TargetKind> for TransferMethod {
    fn from(kind: TargetKind) -> Self {
        match kind {
            TargetKind::Local => Self::Local,
            TargetKind::Ssh => Self::Ssh,
            TargetKind::Docker => Self::Docker,
        }
    }
}

/// Outcome of a successful transfer or sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub method: TransferMethod,
    pub message: String,
}

/// Direction for [`CredentialTransfer::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    /// Local credential file to the target.
    Push,
    /// Target credential file to the local store.
    Pull,
}

/// Writes and reads credential payloads at each tool's canonical path.
#[derive(Debug, Clone)]
pub struct CredentialTransfer {
    home: PathBuf,
    ssh_program: String,
    docker_program: String,
    timeout: Duration,
}

impl CredentialTransfer {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ssh_program: "ssh".to_owned(),
            docker_program: "docker".to_owned(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Override the transport command lines (binary plus leading arguments).
    pub fn with_programs(mut self, ssh: impl Into<String>, docker: impl Into<String>) -> Self {
        self.ssh_program = ssh.into();
        self.docker_program = docker.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Canonical local path of a tool's credential file.
    pub fn local_path(&self, tool: Tool) -> PathBuf {
        self.home.join(relative_path(tool))
    }

    /// Atomically write a payload to the tool's local canonical path with
    /// owner-only permissions.
    pub async fn write_local(&self, tool: Tool, payload: &[u8]) -> Result<PathBuf, AuthError> {
        let path = self.local_path(tool);
        local::write_atomic(&path, payload).await?;
        tracing::debug!(tool = %tool, path = %path.display(), "credential written locally");
        Ok(path)
    }

    pub async fn read_local(&self, tool: Tool) -> Result<Vec<u8>, AuthError> {
        local::read(&self.local_path(tool)).await
    }

    /// Deliver a payload to a target and verify it landed.
    pub async fn transfer(
        &self,
        tool: Tool,
        payload: &[u8],
        target: &RemoteTarget,
    ) -> Result<TransferResult, AuthError> {
        target.validate()?;
        if target.is_local() {
            let path = self.write_local(tool, payload).await?;
            return Ok(TransferResult {
                method: TransferMethod::Local,
                message: format!("wrote {}", path.display()),
            });
        }

        let shell = self.shell(target);
        let rel = relative_path(tool);
        shell.write_file(rel, payload).await?;
        shell.verify_checksum(rel, payload).await?;
        tracing::info!(tool = %tool, target = %target, "credential transferred");
        Ok(TransferResult {
            method: target.kind.into(),
            message: format!("wrote ~/{rel} on {target}"),
        })
    }

    /// Read a tool's credential payload from a target.
    pub async fn read(&self, tool: Tool, target: &RemoteTarget) -> Result<Vec<u8>, AuthError> {
        target.validate()?;
        if target.is_local() {
            return self.read_local(tool).await;
        }
        self.shell(target).read_file(relative_path(tool)).await
    }

    /// Copy a tool's credential between the local store and a target.
    ///
    /// The whole source payload is read before the destination is touched.
    pub async fn sync(
        &self,
        tool: Tool,
        direction: SyncDirection,
        target: &RemoteTarget,
    ) -> Result<TransferResult, AuthError> {
        target.validate()?;
        if target.is_local() {
            return Ok(TransferResult {
                method: TransferMethod::Local,
                message: "source and destination are the same".to_owned(),
            });
        }
        match direction {
            SyncDirection::Push => {
                let payload = self.read_local(tool).await?;
                self.transfer(tool, &payload, target).await
            }
            SyncDirection::Pull => {
                let payload = self.read(tool, target).await?;
                let path = self.write_local(tool, &payload).await?;
                Ok(TransferResult {
                    method: target.kind.into(),
                    message: format!("pulled {target} into {}", path.display()),
                })
            }
        }
    }

    fn shell(&self, target: &RemoteTarget) -> RemoteShell {
        let program = match target.kind {
            TargetKind::Docker => &self.docker_program,
            _ => &self.ssh_program,
        };
        RemoteShell::new(target.clone(), program.clone(), self.timeout)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
