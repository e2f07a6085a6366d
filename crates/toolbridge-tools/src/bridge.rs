//! `local_pc`: relay an operation to the remote agent.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use toolbridge_core::{BridgeAction, BridgeError, BridgeGateway, BridgeParams};

use crate::tool::{Tool, ToolError, ToolOutput, parse_args};

#[derive(Debug, Deserialize)]
struct LocalPcArgs {
    action: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

impl LocalPcArgs {
    fn into_request(self) -> Result<(BridgeAction, BridgeParams, Option<Duration>), ToolError> {
        let action: BridgeAction = self.action.parse().map_err(ToolError::InvalidArgs)?;
        let missing = |field: &str| ToolError::InvalidArgs(format!("{action} requires {field}"));

        match action {
            BridgeAction::Exec if self.command.is_none() => return Err(missing("command")),
            BridgeAction::ReadFile | BridgeAction::ListDir if self.path.is_none() => {
                return Err(missing("path"));
            }
            BridgeAction::WriteFile if self.path.is_none() => return Err(missing("path")),
            BridgeAction::WriteFile if self.content.is_none() => return Err(missing("content")),
            _ => {}
        }

        let params = BridgeParams {
            command: self.command,
            path: self.path,
            content: self.content,
            cwd: self.cwd,
        };
        Ok((action, params, self.timeout_ms.map(Duration::from_millis)))
    }
}

/// Forwards operations to the agent on the user's own machine.
pub struct LocalPcTool {
    gateway: Arc<BridgeGateway>,
}

impl LocalPcTool {
    /// Create the tool.
    #[must_use]
    pub const fn new(gateway: Arc<BridgeGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for LocalPcTool {
    fn name(&self) -> &'static str {
        "local_pc"
    }

    fn description(&self) -> &'static str {
        "Run an operation on the connected local PC agent (ping, exec, read_file, write_file, list_dir)"
    }

    fn input_schema(&self) -> Value {
        let actions: Vec<&str> = BridgeAction::ALL.iter().map(|a| a.as_str()).collect();
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": actions},
                "command": {"type": "string", "description": "Command for exec"},
                "path": {"type": "string", "description": "Path for read_file, write_file, list_dir"},
                "content": {"type": "string", "description": "Content for write_file"},
                "cwd": {"type": "string", "description": "Working directory for exec"},
                "timeout_ms": {"type": "integer", "minimum": 1}
            },
            "required": ["action"]
        })
    }

    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let args: LocalPcArgs = parse_args(args)?;
        let (action, params, timeout) = args.into_request()?;

        match self.gateway.invoke(action, params, timeout).await {
            Ok(result) => Ok(ToolOutput::json(&result)),
            Err(BridgeError::Remote(payload)) => Ok(ToolOutput::error(format!(
                "local_pc {action} failed on the local PC: {}",
                payload.as_str().map_or_else(|| payload.to_string(), ToString::to_string)
            ))),
            Err(e) => Ok(ToolOutput::error(format!("local_pc {action} failed: {e}"))),
        }
    }
}
