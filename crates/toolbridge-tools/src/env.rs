//! `env_info`: describe the server host.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use toolbridge_core::BridgeGateway;

use crate::{
    shell::{UnixShell, resolve_executable_path},
    tool::{Tool, ToolError, ToolOutput},
};

/// Programs whose location is reported when found on PATH.
const PROBED_PROGRAMS: &[&str] = &["git", "python3", "node", "cargo", "docker"];

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

/// Reports OS, paths, available programs and bridge state.
pub struct EnvInfoTool {
    gateway: Arc<BridgeGateway>,
}

impl EnvInfoTool {
    /// Create the tool.
    #[must_use]
    pub const fn new(gateway: Arc<BridgeGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for EnvInfoTool {
    fn name(&self) -> &'static str {
        "env_info"
    }

    fn description(&self) -> &'static str {
        "Describe the server environment and whether a local PC agent is connected"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, _args: Value) -> Result<ToolOutput, ToolError> {
        let mut programs = Map::new();
        for program in PROBED_PROGRAMS {
            if let Some(path) = resolve_executable_path(program).await {
                programs.insert((*program).to_string(), json!(path.to_string_lossy()));
            }
        }

        let shell = if cfg!(windows) {
            json!({"kind": "cmd", "path": "cmd"})
        } else {
            let shell = UnixShell::current_shell();
            json!({"kind": shell.kind(), "path": shell.path().to_string_lossy()})
        };

        let info = json!({
            "hostname": hostname(),
            "os": std::env::consts::OS,
            "family": std::env::consts::FAMILY,
            "arch": std::env::consts::ARCH,
            "pid": std::process::id(),
            "cwd": std::env::current_dir().ok().map(|p| p.to_string_lossy().into_owned()),
            "home": dirs::home_dir().map(|p| p.to_string_lossy().into_owned()),
            "shell": shell,
            "programs": programs,
            "bridge": self.gateway.status(),
        });
        Ok(ToolOutput::json(&info))
    }
}
