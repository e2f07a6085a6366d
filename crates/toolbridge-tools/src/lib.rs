//! Tool handlers exposed to protocol clients.
//!
//! Provides:
//! - `Tool` trait and `ToolRegistry`
//! - Local tools: `shell_exec`, `read_file`, `write_file`, `list_dir`,
//!   `http_request`, `env_info`
//! - `local_pc` - Relay to the remote agent through the bridge gateway

pub mod bridge;
pub mod env;
pub mod exec;
pub mod fs;
pub mod http;
pub mod shell;
pub mod tool;

use std::{sync::Arc, time::Duration};

use toolbridge_core::BridgeGateway;

pub use exec::{CommandPolicy, DEFAULT_BLOCKLIST};
pub use tool::{Tool, ToolDefinition, ToolError, ToolOutput, ToolRegistry};

/// Default timeout for `shell_exec`.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for the built-in tools.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Timeout for `shell_exec` when the caller gives none.
    pub exec_timeout: Duration,
    /// Substrings that reject a `shell_exec` command.
    pub blocklist: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            blocklist: DEFAULT_BLOCKLIST.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Build the registry with every built-in tool.
///
/// # Errors
/// Returns error if the HTTP client cannot be constructed.
pub fn default_registry(
    config: &ToolConfig,
    gateway: Arc<BridgeGateway>,
) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(exec::ShellExecTool::new(
        CommandPolicy::new(config.blocklist.iter().cloned()),
        config.exec_timeout,
    ));
    registry.register(fs::ReadFileTool);
    registry.register(fs::WriteFileTool);
    registry.register(fs::ListDirTool);
    registry.register(http::HttpRequestTool::new()?);
    registry.register(env::EnvInfoTool::new(Arc::clone(&gateway)));
    registry.register(bridge::LocalPcTool::new(gateway));
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_lists_all_tools() {
        let registry =
            default_registry(&ToolConfig::default(), Arc::new(BridgeGateway::default())).unwrap();
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "env_info",
                "http_request",
                "list_dir",
                "local_pc",
                "read_file",
                "shell_exec",
                "write_file",
            ]
        );
    }
}
