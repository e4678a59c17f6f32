// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::authorizer::{AuthorizerConfig, DEFAULT_CALLBACK_PORT};
use crate::credential::DEFAULT_SCOPES;
use crate::lifecycle::LifecycleOptions;

/// Google Workspace credential manager for MCP tool servers.
#[derive(Debug, Clone, Parser)]
#[command(name = "gsuite-mcp", version, about)]
pub struct Config {
    /// OAuth client secrets file downloaded from the Google Cloud console.
    #[arg(long, env = "GSUITE_MCP_GAUTH_FILE", default_value = "./.gauth.json")]
    pub gauth_file: PathBuf,

    /// Accounts file listing the identities tools may act on behalf of.
    #[arg(long, env = "GSUITE_MCP_ACCOUNTS_FILE", default_value = "./.accounts.json")]
    pub accounts_file: PathBuf,

    /// Directory holding one `.oauth2.<email>.json` credential per account.
    #[arg(long, env = "GSUITE_MCP_CREDENTIALS_DIR", default_value = ".")]
    pub credentials_dir: PathBuf,

    /// Loopback port for the OAuth callback listener.
    #[arg(long, env = "GSUITE_MCP_OAUTH_PORT", default_value_t = DEFAULT_CALLBACK_PORT)]
    pub oauth_port: u16,

    /// Seconds to wait for the browser to complete authorization.
    #[arg(long, env = "GSUITE_MCP_AUTH_TIMEOUT_SECS", default_value_t = 300)]
    pub auth_timeout_secs: u64,

    /// Refresh credentials this many seconds before they expire.
    #[arg(long, env = "GSUITE_MCP_EXPIRY_SKEW_SECS", default_value_t = 0)]
    pub expiry_skew_secs: u64,

    /// Check each valid access token against the userinfo endpoint (diagnostic).
    #[arg(long, env = "GSUITE_MCP_VERIFY_ON_USE")]
    pub verify_on_use: bool,

    /// Do not launch a browser; only log the authorization URL.
    #[arg(long, env = "GSUITE_MCP_NO_BROWSER")]
    pub no_browser: bool,

    /// OAuth scopes to request (comma-separated). Defaults to Gmail, Calendar and identity.
    #[arg(long = "scope", env = "GSUITE_MCP_SCOPES", value_delimiter = ',')]
    pub scopes: Vec<String>,

    /// Log format (json or text).
    #[arg(long, env = "GSUITE_MCP_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "GSUITE_MCP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List configured accounts.
    Accounts,
    /// Show stored credential status for every account.
    Status,
    /// Run the browser authorization flow for one account.
    Auth {
        /// Account email.
        email: String,
    },
    /// Print a valid access token for one account, refreshing or
    /// authorizing as needed.
    Token {
        /// Account email.
        email: String,
    },
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth_timeout_secs == 0 {
            anyhow::bail!("--auth-timeout-secs must be greater than zero");
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid --log-format: {} (expected json or text)", self.log_format);
        }
        if self.scopes.iter().any(|s| s.trim().is_empty()) {
            anyhow::bail!("--scope values must not be empty");
        }
        Ok(())
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn expiry_skew(&self) -> Duration {
        Duration::from_secs(self.expiry_skew_secs)
    }

    /// Requested scopes, falling back to the built-in defaults.
    pub fn requested_scopes(&self) -> Vec<String> {
        if self.scopes.is_empty() {
            DEFAULT_SCOPES.iter().map(|s| (*s).to_owned()).collect()
        } else {
            self.scopes.iter().map(|s| s.trim().to_owned()).collect()
        }
    }

    pub fn authorizer_config(&self) -> AuthorizerConfig {
        AuthorizerConfig { port: self.oauth_port, timeout: self.auth_timeout() }
    }

    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            expiry_skew: self.expiry_skew(),
            verify_on_use: self.verify_on_use,
            scopes: self.requested_scopes(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
