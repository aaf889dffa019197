// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use super::*;

fn script(dir: &Path, name: &str, body: &str) -> anyhow::Result<String> {
    let path = dir.join(name);
    std::fs::write(&path, body)?;
    Ok(format!("sh {}", path.display()))
}

fn shell(target: RemoteTarget, program: String) -> RemoteShell {
    RemoteShell::new(target, program, Duration::from_secs(10))
}

#[yare::parameterized(
    plain     = { "abc", "'abc'" },
    spaces    = { "a b", "'a b'" },
    quote     = { "it's", "'it'\\''s'" },
    dollar    = { "$HOME", "'$HOME'" },
)]
fn shell_quote_cases(input: &str, expected: &str) {
    assert_eq!(shell_quote(input), expected);
}

#[test]
fn hex_digest_matches_known_vector() {
    assert_eq!(
        hex_digest(b"abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[tokio::test]
async fn docker_exec_roundtrip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let home = dir.path().join("container-home");
    std::fs::create_dir_all(&home)?;
    // Last argument is the script passed after `sh -c`.
    let docker = script(
        dir.path(),
        "fake-docker.sh",
        &format!("for last; do :; done\nHOME='{}' sh -c \"$last\"\n", home.display()),
    )?;
    let remote = shell(RemoteTarget::docker("dev"), docker);

    remote.write_file(".claude/.credentials.json", b"payload").await?;
    remote.verify_checksum(".claude/.credentials.json", b"payload").await?;
    assert_eq!(remote.read_file(".claude/.credentials.json").await?, b"payload");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ssh_writes_never_interleave() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let home = dir.path().join("remote-home");
    std::fs::create_dir_all(&home)?;
    let ssh = script(
        dir.path(),
        "fake-ssh.sh",
        &format!(
            "for last; do :; done\nHOME='{}'; export HOME\neval \"$last\"\n",
            home.display()
        ),
    )?;
    let rel = ".azure/msal_token_cache.json";
    let big = vec![b'a'; 2 * 1024 * 1024];
    let small = vec![b'b'; 1536 * 1024];

    for _ in 0..4 {
        let writes = [big.clone(), small.clone()].map(|payload| {
            let remote = shell(RemoteTarget::ssh("box"), ssh.clone());
            tokio::spawn(async move { remote.write_file(rel, &payload).await })
        });
        for write in writes {
            write.await??;
        }

        let written = std::fs::read(home.join(rel))?;
        assert!(written == big || written == small, "torn write of {} bytes", written.len());
    }

    let leftovers: Vec<_> = std::fs::read_dir(home.join(".azure"))?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "msal_token_cache.json")
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    Ok(())
}

#[tokio::test]
async fn docker_missing_container_is_transport_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let docker = script(
        dir.path(),
        "no-container.sh",
        "echo 'Error response from daemon: No such container: dev' >&2\nexit 1\n",
    )?;
    let remote = shell(RemoteTarget::docker("dev"), docker);
    let err = remote.write_file(".x", b"p").await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::TransportError));
    Ok(())
}

#[tokio::test]
async fn ssh_exit_255_is_transport_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ssh = script(dir.path(), "refused.sh", "echo 'Connection refused' >&2\nexit 255\n")?;
    let remote = shell(RemoteTarget::ssh("box"), ssh);
    let err = remote.read_file(".x").await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::TransportError));
    Ok(())
}

#[tokio::test]
async fn missing_transport_binary_is_transport_error() {
    let remote = shell(RemoteTarget::ssh("box"), "/nonexistent/authmux-ssh".to_owned());
    let err = remote.write_file(".x", b"p").await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::TransportError));
}

#[tokio::test]
async fn remote_script_failure_is_write_denied() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ssh = script(dir.path(), "denied.sh", "cat >/dev/null\necho 'Permission denied' >&2\nexit 1\n")?;
    let remote = shell(RemoteTarget::ssh("box"), ssh);
    let err = remote.write_file(".x", b"p").await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::WriteDenied));
    Ok(())
}

#[tokio::test]
async fn checksum_mismatch_is_verification_failed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ssh = script(dir.path(), "tamper.sh", "echo deadbeef\n")?;
    let remote = shell(RemoteTarget::ssh("box"), ssh);
    let err = remote.verify_checksum(".x", b"payload").await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::VerificationFailed));
    Ok(())
}

#[tokio::test]
async fn slow_transport_times_out() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ssh = script(dir.path(), "hang.sh", "sleep 30\n")?;
    let remote =
        RemoteShell::new(RemoteTarget::ssh("box"), ssh, Duration::from_millis(200));
    let err = remote.read_file(".x").await.err();
    assert_eq!(err.map(|e| e.code), Some(ErrorCode::TransportError));
    Ok(())
}
