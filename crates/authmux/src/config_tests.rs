// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::AuthConfig;

fn parse(args: &[&str]) -> AuthConfig {
    AuthConfig::parse_from(args)
}

#[test]
fn defaults_are_valid() -> anyhow::Result<()> {
    let config = parse(&["authmux"]);
    config.validate()?;
    assert_eq!(config.port, 9850);
    assert_eq!(config.expiry_tick(), Duration::from_secs(60));
    assert_eq!(config.refresh_lookahead(), Duration::from_secs(300));
    assert_eq!(config.device_url_timeout(), Duration::from_secs(15));
    assert_eq!(config.subscriber_queue, 256);
    Ok(())
}

#[test]
fn overrides_apply() -> anyhow::Result<()> {
    let config = parse(&[
        "authmux",
        "--port",
        "7000",
        "--expiry-tick-secs",
        "5",
        "--home-dir",
        "/tmp/authmux-home",
        "--azure-command",
        "az login --use-device-code --tenant t",
    ]);
    config.validate()?;
    assert_eq!(config.port, 7000);
    assert_eq!(config.expiry_tick(), Duration::from_secs(5));
    assert_eq!(config.home(), PathBuf::from("/tmp/authmux-home"));
    assert!(config.azure_command.ends_with("--tenant t"));
    Ok(())
}

#[yare::parameterized(
    zero_tick      = { &["authmux", "--expiry-tick-secs", "0"], "expiry-tick" },
    zero_lookahead = { &["authmux", "--refresh-lookahead-secs", "0"], "lookahead" },
    zero_ttl       = { &["authmux", "--session-ttl-secs", "0"], "session-ttl" },
    zero_window    = { &["authmux", "--device-url-timeout-secs", "0"], "device-url-timeout" },
    zero_queue     = { &["authmux", "--subscriber-queue", "0"], "subscriber-queue" },
    empty_azure    = { &["authmux", "--azure-command", " "], "azure-command" },
    bad_log_format = { &["authmux", "--log-format", "xml"], "log format" },
)]
fn invalid_config(args: &[&str], expected_substr: &str) {
    let config = parse(args);
    match config.validate() {
        Ok(()) => unreachable!("expected validation failure for {args:?}"),
        Err(e) => assert!(e.to_string().contains(expected_substr), "{e} !~ {expected_substr}"),
    }
}

#[test]
fn test_config_is_valid() -> anyhow::Result<()> {
    AuthConfig::test().validate()
}
