//! Wire protocol spoken with the remote agent over the bridge link.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation the remote agent is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeAction {
    /// Liveness probe.
    Ping,
    /// Run a shell command.
    Exec,
    /// Read a file.
    ReadFile,
    /// Write a file.
    WriteFile,
    /// List a directory.
    ListDir,
}

impl BridgeAction {
    /// All actions, in wire order.
    pub const ALL: [Self; 5] = [
        Self::Ping,
        Self::Exec,
        Self::ReadFile,
        Self::WriteFile,
        Self::ListDir,
    ];

    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Exec => "exec",
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::ListDir => "list_dir",
        }
    }
}

impl fmt::Display for BridgeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BridgeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown bridge action: {s}"))
    }
}

/// Optional arguments carried alongside an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl BridgeParams {
    /// Parameters for an `exec` request.
    #[must_use]
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    /// Parameters addressing a path.
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}

/// Request sent from the gateway to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: String,
    pub action: BridgeAction,
    #[serde(flatten)]
    pub params: BridgeParams,
}

/// Host details an agent announces when it connects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

/// Message received from the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    /// `{type: "register", hostname, platform}` handshake.
    Register(AgentInfo),
    /// `{id, result}` or `{id, error}`.
    Reply {
        id: String,
        outcome: Result<Value, Value>,
    },
    /// Valid JSON that is neither a handshake nor carries an id.
    Unrecognized(Value),
}

impl AgentMessage {
    /// Parse a text frame from the agent.
    ///
    /// # Errors
    /// Returns error if the frame is not JSON.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;

        if value.get("type").and_then(Value::as_str) == Some("register") {
            let info = serde_json::from_value(value)?;
            return Ok(Self::Register(info));
        }

        let id = match value.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Ok(Self::Unrecognized(value)),
        };

        let outcome = match value.get("error") {
            Some(err) if !err.is_null() => Err(err.clone()),
            _ => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };

        Ok(Self::Reply { id, outcome })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_flattens_params() {
        let req = BridgeRequest {
            id: "abc".to_string(),
            action: BridgeAction::Exec,
            params: BridgeParams {
                command: Some("echo hi".to_string()),
                cwd: Some("/tmp".to_string()),
                ..BridgeParams::default()
            },
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"id": "abc", "action": "exec", "command": "echo hi", "cwd": "/tmp"})
        );
    }

    #[test]
    fn test_action_names() {
        assert_eq!("list_dir".parse::<BridgeAction>().unwrap(), BridgeAction::ListDir);
        assert_eq!(BridgeAction::WriteFile.to_string(), "write_file");
        assert!("format_disk".parse::<BridgeAction>().is_err());
    }

    #[test]
    fn test_parse_register() {
        let msg = AgentMessage::parse(r#"{"type":"register","hostname":"desk","platform":"win32"}"#)
            .unwrap();
        assert_eq!(
            msg,
            AgentMessage::Register(AgentInfo {
                hostname: Some("desk".to_string()),
                platform: Some("win32".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_replies() {
        let ok = AgentMessage::parse(r#"{"id":"1","result":{"stdout":"hi\n"}}"#).unwrap();
        assert_eq!(
            ok,
            AgentMessage::Reply {
                id: "1".to_string(),
                outcome: Ok(json!({"stdout": "hi\n"})),
            }
        );

        let err = AgentMessage::parse(r#"{"id":7,"error":"ENOENT"}"#).unwrap();
        assert_eq!(
            err,
            AgentMessage::Reply {
                id: "7".to_string(),
                outcome: Err(json!("ENOENT")),
            }
        );
    }

    #[test]
    fn test_parse_unrecognized_and_garbage() {
        assert!(matches!(
            AgentMessage::parse(r#"{"hello":"world"}"#).unwrap(),
            AgentMessage::Unrecognized(_)
        ));
        assert!(AgentMessage::parse("not json").is_err());
    }
}
