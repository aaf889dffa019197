// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Configuration for the authmux session orchestrator.
#[derive(Debug, Clone, Parser)]
#[command(name = "authmux", version, about = "Authentication session orchestrator for CLI tools")]
pub struct AuthConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "AUTHMUX_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9850, env = "AUTHMUX_PORT")]
    pub port: u16,

    /// Bearer token for API auth. If unset, auth is disabled.
    #[arg(long, env = "AUTHMUX_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Log format (json or text).
    #[arg(long, default_value = "text", env = "AUTHMUX_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "AUTHMUX_LOG_LEVEL")]
    pub log_level: String,

    /// Lifetime of a non-terminal session before the expiry sweep claims it.
    #[arg(long, default_value_t = 600, env = "AUTHMUX_SESSION_TTL_SECS")]
    pub session_ttl_secs: u64,

    /// Expiry monitor tick interval.
    #[arg(long, default_value_t = 60, env = "AUTHMUX_EXPIRY_TICK_SECS")]
    pub expiry_tick_secs: u64,

    /// Refresh credentials expiring within this many seconds.
    #[arg(long, default_value_t = 300, env = "AUTHMUX_REFRESH_LOOKAHEAD_SECS")]
    pub refresh_lookahead_secs: u64,

    /// How long terminal sessions stay queryable before garbage collection.
    #[arg(long, default_value_t = 3600, env = "AUTHMUX_TERMINAL_GRACE_SECS")]
    pub terminal_grace_secs: u64,

    /// Bounded window for a device-login subprocess to print its URL and code.
    #[arg(long, default_value_t = 15, env = "AUTHMUX_DEVICE_URL_TIMEOUT_SECS")]
    pub device_url_timeout_secs: u64,

    /// Per-subscriber event queue capacity (oldest events dropped on overflow).
    #[arg(long, default_value_t = 256, env = "AUTHMUX_SUBSCRIBER_QUEUE")]
    pub subscriber_queue: usize,

    /// Root directory for canonical credential paths. Defaults to `$HOME`.
    #[arg(long, env = "AUTHMUX_HOME")]
    pub home_dir: Option<PathBuf>,

    /// Claude OAuth authorization endpoint.
    #[arg(long, default_value = CLAUDE_AUTHORIZE_URL, env = "AUTHMUX_CLAUDE_AUTHORIZE_URL")]
    pub claude_authorize_url: String,

    /// Claude OAuth token endpoint.
    #[arg(long, default_value = CLAUDE_TOKEN_URL, env = "AUTHMUX_CLAUDE_TOKEN_URL")]
    pub claude_token_url: String,

    /// Claude OAuth public client ID.
    #[arg(long, default_value = CLAUDE_CLIENT_ID, env = "AUTHMUX_CLAUDE_CLIENT_ID")]
    pub claude_client_id: String,

    /// Claude OAuth redirect URI (Claude's own code callback page).
    #[arg(long, default_value = CLAUDE_REDIRECT_URI, env = "AUTHMUX_CLAUDE_REDIRECT_URI")]
    pub claude_redirect_uri: String,

    /// Space-separated Claude OAuth scopes.
    #[arg(long, default_value = CLAUDE_SCOPES, env = "AUTHMUX_CLAUDE_SCOPES")]
    pub claude_scopes: String,

    /// Device-login command line for Azure (run via `sh -c`).
    #[arg(long, default_value = "az login --use-device-code", env = "AUTHMUX_AZURE_COMMAND")]
    pub azure_command: String,

    /// Device-login command line for Google Cloud (run via `sh -c`).
    ///
    /// `gcloud auth login --no-launch-browser` prints a URL and then reads a
    /// verification code from stdin. No user code appears in its output and
    /// stdin is closed, so sessions with the default fail with `Timeout`
    /// naming the URL. Point this at a wrapper that prints
    /// "visit <url> and enter code <CODE>" for a working gcloud flow.
    #[arg(
        long,
        default_value = "gcloud auth login --no-launch-browser",
        env = "AUTHMUX_GCLOUD_COMMAND"
    )]
    pub gcloud_command: String,
}

pub const CLAUDE_AUTHORIZE_URL: &str = "https://claude.ai/oauth/authorize";
pub const CLAUDE_TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
pub const CLAUDE_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
pub const CLAUDE_REDIRECT_URI: &str = "https://console.anthropic.com/oauth/code/callback";
pub const CLAUDE_SCOPES: &str = "org:create_api_key user:profile user:inference";

impl AuthConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.expiry_tick_secs == 0 {
            anyhow::bail!("--expiry-tick-secs must be greater than zero");
        }
        if self.refresh_lookahead_secs == 0 {
            anyhow::bail!("--refresh-lookahead-secs must be greater than zero");
        }
        if self.session_ttl_secs == 0 {
            anyhow::bail!("--session-ttl-secs must be greater than zero");
        }
        if self.device_url_timeout_secs == 0 {
            anyhow::bail!("--device-url-timeout-secs must be greater than zero");
        }
        if self.subscriber_queue == 0 {
            anyhow::bail!("--subscriber-queue must be greater than zero");
        }
        if self.azure_command.trim().is_empty() {
            anyhow::bail!("--azure-command must not be empty");
        }
        if self.gcloud_command.trim().is_empty() {
            anyhow::bail!("--gcloud-command must not be empty");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other} (expected json or text)"),
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn expiry_tick(&self) -> Duration {
        Duration::from_secs(self.expiry_tick_secs)
    }

    pub fn refresh_lookahead(&self) -> Duration {
        Duration::from_secs(self.refresh_lookahead_secs)
    }

    pub fn terminal_grace(&self) -> Duration {
        Duration::from_secs(self.terminal_grace_secs)
    }

    pub fn device_url_timeout(&self) -> Duration {
        Duration::from_secs(self.device_url_timeout_secs)
    }

    /// OAuth endpoints for the claude browser-relay flow.
    pub fn claude_client(&self) -> crate::flow::pkce::OAuthClient {
        crate::flow::pkce::OAuthClient {
            authorize_url: self.claude_authorize_url.clone(),
            token_url: self.claude_token_url.clone(),
            client_id: self.claude_client_id.clone(),
            redirect_uri: self.claude_redirect_uri.clone(),
            scope: self.claude_scopes.clone(),
        }
    }

    /// Resolve the home directory that canonical credential paths hang off.
    ///
    /// Checks `--home-dir`, then `$HOME`, then the working directory.
    pub fn home(&self) -> PathBuf {
        if let Some(ref dir) = self.home_dir {
            return dir.clone();
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home);
        }
        PathBuf::from(".")
    }

    /// Build a config with defaults, suitable for tests and embedding.
    pub fn test() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            auth_token: None,
            log_format: "text".into(),
            log_level: "debug".into(),
            session_ttl_secs: 600,
            expiry_tick_secs: 60,
            refresh_lookahead_secs: 300,
            terminal_grace_secs: 3600,
            device_url_timeout_secs: 15,
            subscriber_queue: 256,
            home_dir: None,
            claude_authorize_url: CLAUDE_AUTHORIZE_URL.into(),
            claude_token_url: CLAUDE_TOKEN_URL.into(),
            claude_client_id: CLAUDE_CLIENT_ID.into(),
            claude_redirect_uri: CLAUDE_REDIRECT_URI.into(),
            claude_scopes: CLAUDE_SCOPES.into(),
            azure_command: "az login --use-device-code".into(),
            gcloud_command: "gcloud auth login --no-launch-browser".into(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
