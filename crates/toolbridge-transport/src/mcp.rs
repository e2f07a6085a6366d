//! MCP method dispatch for one session.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use toolbridge_session::{ClientInfo, SessionTransport};
use toolbridge_tools::{ToolError, ToolRegistry};

use crate::protocol::{
    INTERNAL_ERROR, INVALID_PARAMS, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND,
};

/// MCP revision this server speaks.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Method that opens a session.
pub const INITIALIZE: &str = "initialize";

/// MCP dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// JSON-RPC error code.
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self {
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    #[serde(default)]
    protocol_version: Option<String>,
    #[serde(default)]
    client_info: Option<ClientInfo>,
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Answers MCP requests against the tool registry.
pub struct McpHandler {
    tools: Arc<ToolRegistry>,
    server_name: String,
    server_version: String,
}

impl McpHandler {
    /// Create a handler serving `tools`.
    #[must_use]
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            server_name: "toolbridge".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// The registry this handler serves.
    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Handle one message. Notifications yield no response.
    pub async fn handle(
        &self,
        session: &SessionTransport,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        let result = self.dispatch(session, &method, params).await;

        let Some(id) = id else {
            if let Err(e) = result {
                tracing::debug!(session_id = session.id(), %method, "Notification failed: {e}");
            }
            return None;
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                tracing::debug!(session_id = session.id(), %method, "Request failed: {e}");
                JsonRpcResponse::failure(id, e.code(), e.to_string())
            }
        })
    }

    async fn dispatch(
        &self,
        session: &SessionTransport,
        method: &str,
        params: Value,
    ) -> Result<Value, McpError> {
        match method {
            INITIALIZE => Ok(self.initialize(session, params)),
            "notifications/initialized" | "notifications/cancelled" => Ok(Value::Null),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.tools.definitions() })),
            "tools/call" => self.call_tool(session, params).await,
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }

    fn initialize(&self, session: &SessionTransport, params: Value) -> Value {
        let params: InitializeParams = serde_json::from_value(params).unwrap_or_default();
        let mut client = params.client_info.unwrap_or_default();
        client.protocol_version = params.protocol_version;
        tracing::info!(
            session_id = session.id(),
            client = %client.name,
            protocol = client.protocol_version.as_deref().unwrap_or("?"),
            "Client initialized"
        );
        session.set_client_info(client);

        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version,
            }
        })
    }

    async fn call_tool(&self, session: &SessionTransport, params: Value) -> Result<Value, McpError> {
        let params: CallToolParams =
            serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))?;
        tracing::debug!(session_id = session.id(), tool = %params.name, "Tool call");

        let output = match self.tools.call(&params.name, params.arguments).await {
            Ok(output) => output,
            Err(ToolError::Unknown(name)) => {
                return Err(McpError::InvalidParams(format!("Unknown tool: {name}")));
            }
            Err(e) => return Err(McpError::Internal(e.to_string())),
        };

        Ok(json!({
            "content": [{ "type": "text", "text": output.content }],
            "isError": output.is_error,
        }))
    }
}
