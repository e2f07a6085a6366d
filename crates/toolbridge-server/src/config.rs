//! Command-line and environment configuration.

use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result, bail};
use clap::Parser;
use toolbridge_tools::{DEFAULT_BLOCKLIST, ToolConfig};
use toolbridge_transport::AuthConfig;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "MCP tool server with a local PC bridge")]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, env = "TOOLBRIDGE_BIND", default_value = "127.0.0.1:8787")]
    pub bind: String,

    /// Bearer token required on /mcp. Empty disables the check.
    #[arg(long, env = "TOOLBRIDGE_AUTH_TOKEN", default_value = "")]
    pub auth_token: String,

    /// Key the local PC agent must present. Empty rejects every agent.
    #[arg(long, env = "TOOLBRIDGE_BRIDGE_KEY", default_value = "")]
    pub bridge_key: String,

    /// Default deadline for bridge requests, in milliseconds.
    #[arg(long, env = "TOOLBRIDGE_BRIDGE_TIMEOUT_MS", default_value_t = 15_000)]
    pub bridge_timeout_ms: u64,

    /// Default deadline for shell_exec, in milliseconds.
    #[arg(long, env = "TOOLBRIDGE_EXEC_TIMEOUT_MS", default_value_t = 30_000)]
    pub exec_timeout_ms: u64,

    /// Comma-separated substrings that reject a shell_exec command.
    #[arg(long, env = "TOOLBRIDGE_BLOCKLIST", value_delimiter = ',')]
    pub blocklist: Option<Vec<String>>,

    /// Log level filter, e.g. info,toolbridge_core=debug.
    #[arg(long, env = "TOOLBRIDGE_LOG", default_value = "info")]
    pub log: String,
}

/// Validated settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: SocketAddr,
    pub auth: AuthConfig,
    pub bridge_timeout: Duration,
    pub tools: ToolConfig,
    pub log: String,
}

impl Cli {
    /// Validate and convert into [`Settings`].
    ///
    /// # Errors
    /// Returns error if the bind address does not parse or a timeout is zero.
    pub fn into_settings(self) -> Result<Settings> {
        let bind: SocketAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address: {}", self.bind))?;
        if self.bridge_timeout_ms == 0 {
            bail!("--bridge-timeout-ms must be greater than zero");
        }
        if self.exec_timeout_ms == 0 {
            bail!("--exec-timeout-ms must be greater than zero");
        }

        let blocklist = self.blocklist.map_or_else(
            || DEFAULT_BLOCKLIST.iter().map(ToString::to_string).collect(),
            |entries| {
                entries
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            },
        );

        Ok(Settings {
            bind,
            auth: AuthConfig::new(Some(self.auth_token), Some(self.bridge_key)),
            bridge_timeout: Duration::from_millis(self.bridge_timeout_ms),
            tools: ToolConfig {
                exec_timeout: Duration::from_millis(self.exec_timeout_ms),
                blocklist,
            },
            log: self.log,
        })
    }
}
