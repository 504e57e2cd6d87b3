// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Session keeper for an OAuth-authenticated backend.
#[derive(Debug, Clone, Parser)]
#[command(name = "signon", version, about)]
pub struct Config {
    /// Backend base URL.
    #[arg(long, env = "SIGNON_BACKEND_URL", default_value = "http://localhost:8080")]
    pub backend_url: String,

    /// Redirect URL from a completed provider login, consumed once at
    /// bootstrap.
    #[arg(long, env = "SIGNON_REDIRECT_URL")]
    pub redirect_url: Option<String>,

    /// Directory for persisted credentials (defaults to the state dir).
    #[arg(long, env = "SIGNON_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Seconds of remaining validity below which a proactive refresh starts.
    #[arg(long, env = "SIGNON_REFRESH_THRESHOLD", default_value = "10")]
    pub refresh_threshold_secs: u64,

    /// OAuth provider name used when printing the login URL.
    #[arg(long, env = "SIGNON_PROVIDER", default_value = "kakao")]
    pub provider: String,

    /// Print the provider login URL and exit.
    #[arg(long)]
    pub print_login_url: bool,

    /// Notify the backend, clear stored credentials, and exit.
    #[arg(long)]
    pub logout: bool,

    /// Log level filter (e.g. info, debug, signon=trace).
    #[arg(long, env = "SIGNON_LOG", default_value = "info")]
    pub log_level: String,

    /// Log format: text or json.
    #[arg(long, env = "SIGNON_LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        Url::parse(&self.backend_url)
            .map_err(|e| anyhow::anyhow!("invalid backend URL {:?}: {e}", self.backend_url))?;
        if let Some(ref redirect) = self.redirect_url {
            Url::parse(redirect)
                .map_err(|e| anyhow::anyhow!("invalid redirect URL {redirect:?}: {e}"))?;
        }
        if self.refresh_threshold_secs == 0 {
            anyhow::bail!("refresh threshold must be at least 1 second");
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be text or json, got {:?}", self.log_format);
        }
        if self.print_login_url && self.logout {
            anyhow::bail!("cannot combine --print-login-url with --logout");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
