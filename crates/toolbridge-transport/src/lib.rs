//! Client-facing transports.
//!
//! Provides:
//! - JSON-RPC 2.0 message types
//! - MCP method dispatch over the tool registry
//! - Streamable-HTTP endpoint (`/mcp`) with bearer auth and SSE notifications
//! - WebSocket endpoint (`/bridge`) for the local PC agent

pub mod http;
pub mod mcp;
pub mod protocol;
pub mod websocket;

pub use http::{AppState, AuthConfig, HttpError, SESSION_HEADER, create_router};
pub use mcp::{McpError, McpHandler, PROTOCOL_VERSION};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use websocket::{BRIDGE_KEY_HEADER, CLOSE_UNAUTHORIZED};
