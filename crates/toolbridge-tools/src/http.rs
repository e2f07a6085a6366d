//! `http_request`: outbound HTTP fetch.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    exec::{MAX_OUTPUT_BYTES, truncate_lossy},
    tool::{Tool, ToolError, ToolOutput, parse_args},
};

/// Default request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct HttpArgs {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// Performs HTTP requests from the server.
pub struct HttpRequestTool {
    client: Client,
}

impl HttpRequestTool {
    /// Create the tool with its own connection pool.
    ///
    /// # Errors
    /// Returns error if the TLS backend fails to initialize.
    pub fn new() -> Result<Self, ToolError> {
        let client = Client::builder()
            .user_agent(concat!("toolbridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Create the tool around an existing client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &'static str {
        "http_request"
    }

    fn description(&self) -> &'static str {
        "Make an HTTP request from the server and return status, headers and body"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"},
                "method": {"type": "string", "default": "GET"},
                "headers": {"type": "object", "additionalProperties": {"type": "string"}},
                "body": {"type": "string"},
                "timeout_ms": {"type": "integer", "minimum": 1}
            },
            "required": ["url"]
        })
    }

    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let args: HttpArgs = parse_args(args)?;
        let method_name = args.method.as_deref().unwrap_or("GET").to_uppercase();
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| ToolError::InvalidArgs(format!("invalid method: {method_name}")))?;
        let url = reqwest::Url::parse(&args.url)
            .map_err(|e| ToolError::InvalidArgs(format!("invalid url {}: {e}", args.url)))?;

        let mut request = self
            .client
            .request(method, url)
            .timeout(args.timeout_ms.map_or(DEFAULT_HTTP_TIMEOUT, Duration::from_millis));
        for (name, value) in &args.headers {
            request = request.header(name, value);
        }
        if let Some(body) = args.body {
            request = request.body(body);
        }

        let mut response = request.send().await?;
        let status = response.status();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();

        // One byte past the cap is enough to know the body was cut
        let mut bytes = Vec::new();
        let mut cut_short = false;
        while let Some(chunk) = response.chunk().await? {
            let room = MAX_OUTPUT_BYTES + 1 - bytes.len();
            bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if bytes.len() > MAX_OUTPUT_BYTES {
                cut_short = true;
                break;
            }
        }
        let (body, truncated) = truncate_lossy(&bytes, MAX_OUTPUT_BYTES);

        Ok(ToolOutput::json(&json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
            "truncated": truncated || cut_short,
        })))
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    #[tokio::test]
    async fn test_get_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0_u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_lowercase();
            assert!(request.starts_with("post /echo"));
            assert!(request.contains("x-probe: 1"));
            socket
                .write_all(b"HTTP/1.1 201 Created\r\ncontent-type: text/plain\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                .await
                .unwrap();
        });

        let client = Client::builder().no_proxy().build().unwrap();
        let tool = HttpRequestTool::with_client(client);
        let out = tool
            .call(json!({
                "url": format!("http://{addr}/echo"),
                "method": "post",
                "headers": {"x-probe": "1"},
                "body": "ping"
            }))
            .await
            .unwrap();

        let report: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(report["status"], 201);
        assert_eq!(report["body"], "ok");
        assert_eq!(report["headers"]["content-type"], "text/plain");
    }

    #[tokio::test]
    async fn test_large_body_is_capped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let size = MAX_OUTPUT_BYTES * 4;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0_u8; 4096];
            let _ = socket.read(&mut buf).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {size}\r\nconnection: close\r\n\r\n"
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&vec![b'a'; size]).await;
        });

        let client = Client::builder().no_proxy().build().unwrap();
        let out = HttpRequestTool::with_client(client)
            .call(json!({"url": format!("http://{addr}/big")}))
            .await
            .unwrap();

        let report: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(report["status"], 200);
        assert_eq!(report["truncated"], true);
        assert_eq!(report["body"].as_str().unwrap().len(), MAX_OUTPUT_BYTES);
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let tool = HttpRequestTool::new().unwrap();
        assert!(matches!(
            tool.call(json!({"url": "not a url"})).await,
            Err(ToolError::InvalidArgs(_))
        ));
        assert!(matches!(
            tool.call(json!({"url": "http://localhost", "method": "BAD METHOD"})).await,
            Err(ToolError::InvalidArgs(_))
        ));
    }
}
