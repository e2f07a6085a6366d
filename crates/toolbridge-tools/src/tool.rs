//! Tool trait and registry.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use toolbridge_core::BridgeError;

/// Tool error.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("Command blocked by policy (matched {0:?})")]
    Blocked(String),
    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Http(format!("request timed out: {e}"))
        } else {
            Self::Http(e.to_string())
        }
    }
}

/// Result handed back to the protocol client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful text result.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Failed result.
    #[must_use]
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }

    /// Successful result rendered as pretty JSON; bare strings pass through.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::text(s.clone()),
            other => Self::text(serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())),
        }
    }
}

/// Tool listing entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// A named operation callable by protocol clients.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &'static str;

    /// One-line description shown to clients.
    fn description(&self) -> &'static str;

    /// JSON Schema of the arguments object.
    fn input_schema(&self) -> Value;

    /// Run the tool.
    ///
    /// Errors are reported to the client as an `isError` result.
    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError>;
}

/// Decode a tool's arguments object.
///
/// # Errors
/// Returns `InvalidArgs` describing the first mismatch.
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    let args = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArgs(e.to_string()))
}

/// Tools indexed by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool of the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Arc::new(tool));
    }

    /// Definitions of every tool, ordered by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Call tool `name`.
    ///
    /// # Errors
    /// Returns `Unknown` if no such tool exists. Failures inside the tool
    /// come back as an `isError` output, not as `Err`.
    pub async fn call(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;

        let started = std::time::Instant::now();
        let output = match tool.call(args).await {
            Ok(output) => output,
            Err(e) => ToolOutput::error(format!("{name} failed: {e}")),
        };
        tracing::info!(
            tool = name,
            is_error = output.is_error,
            elapsed_ms = started.elapsed().as_millis(),
            "Tool call finished"
        );
        Ok(output)
    }
}
