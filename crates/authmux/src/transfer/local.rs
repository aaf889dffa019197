// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local credential files: atomic owner-only writes.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{AuthError, ErrorCode};

/// Owner read/write only.
pub const CREDENTIAL_MODE: u32 = 0o600;

/// Write `payload` to `path` atomically (write tmp + fsync + rename).
///
/// Uses a unique temp filename (PID + counter) so concurrent writers never
/// share a `.tmp` file. Parent directories are created as needed.
pub async fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), AuthError> {
    let path = path.to_path_buf();
    let payload = payload.to_vec();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &payload))
        .await
        .map_err(|e| AuthError::internal(format!("write task failed: {e}")))?
}

fn write_atomic_blocking(path: &Path, payload: &[u8]) -> Result<(), AuthError> {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let denied = |what: &str, e: std::io::Error| {
        AuthError::write_denied(format!("{what} {}: {e}", path.display()))
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| denied("cannot create parent of", e))?;
    }

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);

    let result = write_tmp(&tmp_path, payload)
        .and_then(|()| std::fs::rename(&tmp_path, path))
        .map_err(|e| denied("cannot write", e));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

fn write_tmp(tmp_path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(CREDENTIAL_MODE);
    }
    let mut file = options.open(tmp_path)?;
    file.write_all(payload)?;
    file.sync_all()?;
    Ok(())
}

/// Read a whole credential file.
pub async fn read(path: &Path) -> Result<Vec<u8>, AuthError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AuthError::new(
            ErrorCode::NotFound,
            format!("no credential file at {}", path.display()),
        )),
        Err(e) => Err(AuthError::write_denied(format!("cannot read {}: {e}", path.display()))),
    }
}
