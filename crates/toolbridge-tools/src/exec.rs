//! `shell_exec`: run a command through the platform shell.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::Command;

use crate::{
    shell::get_shell_command,
    tool::{Tool, ToolError, ToolOutput, parse_args},
};

/// Per-stream output cap.
pub const MAX_OUTPUT_BYTES: usize = 100 * 1024;

/// Substrings rejected by default.
pub const DEFAULT_BLOCKLIST: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "mkfs",
    "dd if=",
    ":(){",
    "shutdown",
    "reboot",
    "format c:",
];

/// Substring blocklist applied to commands before they run.
///
/// Matching is case-insensitive. This is a tripwire for obvious accidents,
/// not a sandbox.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    blocked: Vec<String>,
}

impl CommandPolicy {
    /// Build a policy from blocked substrings; blanks are ignored.
    #[must_use]
    pub fn new<I, S>(blocked: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blocked: blocked
                .into_iter()
                .map(|s| s.into().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Reject `command` if it contains a blocked substring.
    ///
    /// # Errors
    /// Returns `Blocked` with the matching pattern.
    pub fn check(&self, command: &str) -> Result<(), ToolError> {
        let lowered = command.to_lowercase();
        match self.blocked.iter().find(|p| lowered.contains(p.as_str())) {
            Some(pattern) => Err(ToolError::Blocked(pattern.clone())),
            None => Ok(()),
        }
    }
}

/// Cut `bytes` to at most `max` bytes on a char boundary.
pub(crate) fn truncate_lossy(bytes: &[u8], max: usize) -> (String, bool) {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        return (text.into_owned(), false);
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

#[derive(Debug, Deserialize)]
struct ExecArgs {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    argv: Option<Vec<String>>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// Runs shell commands on the server host.
pub struct ShellExecTool {
    policy: CommandPolicy,
    default_timeout: Duration,
}

impl ShellExecTool {
    /// Create the tool.
    #[must_use]
    pub const fn new(policy: CommandPolicy, default_timeout: Duration) -> Self {
        Self {
            policy,
            default_timeout,
        }
    }
}

#[async_trait]
impl Tool for ShellExecTool {
    fn name(&self) -> &'static str {
        "shell_exec"
    }

    fn description(&self) -> &'static str {
        "Run a shell command on the server and return its exit code, stdout and stderr"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Command line passed to the shell"},
                "argv": {"type": "array", "items": {"type": "string"}, "description": "Program and arguments, quoted for the shell (alternative to command)"},
                "cwd": {"type": "string", "description": "Working directory"},
                "timeout_ms": {"type": "integer", "minimum": 1}
            }
        })
    }

    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let args: ExecArgs = parse_args(args)?;
        let command = match (args.command, args.argv) {
            (Some(command), _) if !command.trim().is_empty() => command,
            (_, Some(argv)) if !argv.is_empty() => shlex::try_join(argv.iter().map(String::as_str))
                .map_err(|e| ToolError::InvalidArgs(e.to_string()))?,
            _ => return Err(ToolError::InvalidArgs("command is required".to_string())),
        };
        self.policy.check(&command)?;

        let timeout = args
            .timeout_ms
            .map_or(self.default_timeout, Duration::from_millis);
        let (shell, flag) = get_shell_command();

        let mut cmd = Command::new(shell);
        cmd.arg(flag)
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &args.cwd {
            cmd.current_dir(cwd);
        }

        tracing::debug!(%command, cwd = args.cwd.as_deref(), "Running command");
        let child = cmd.spawn()?;
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::Timeout(timeout))??;

        let (stdout, stdout_truncated) = truncate_lossy(&output.stdout, MAX_OUTPUT_BYTES);
        let (stderr, stderr_truncated) = truncate_lossy(&output.stderr, MAX_OUTPUT_BYTES);
        let report = json!({
            "exit_code": output.status.code(),
            "stdout": stdout,
            "stderr": stderr,
            "truncated": stdout_truncated || stderr_truncated,
        });

        let mut result = ToolOutput::json(&report);
        result.is_error = !output.status.success();
        Ok(result)
    }
}
