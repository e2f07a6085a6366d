//! File tools: `read_file`, `write_file`, `list_dir`.

use std::path::Path;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;

use crate::tool::{Tool, ToolError, ToolOutput, parse_args};

/// Largest file `read_file` will return.
pub const MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

/// First line of a `read_file` result carrying binary content.
pub const BASE64_MARKER: &str = "[base64]";

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

/// Reads a file; text as-is, anything else base64 encoded.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a file on the server"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        })
    }

    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let PathArgs { path } = parse_args(args)?;

        let size = tokio::fs::metadata(&path).await?.len();
        if size > MAX_READ_BYTES {
            return Ok(ToolOutput::error(format!(
                "{path} is {size} bytes; refusing to read more than {MAX_READ_BYTES}"
            )));
        }

        let bytes = tokio::fs::read(&path).await?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => ToolOutput::text(text),
            Err(e) => ToolOutput::text(format!("{BASE64_MARKER}\n{}", BASE64.encode(e.as_bytes()))),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
    #[serde(default)]
    create_dirs: bool,
    #[serde(default)]
    append: bool,
}

/// Writes (or appends) text to a file.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write text to a file on the server"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"},
                "create_dirs": {"type": "boolean", "default": false},
                "append": {"type": "boolean", "default": false}
            },
            "required": ["path", "content"]
        })
    }

    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let args: WriteArgs = parse_args(args)?;
        let path = Path::new(&args.path);

        if args.create_dirs {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(args.append)
            .truncate(!args.append)
            .open(path)
            .await?;
        file.write_all(args.content.as_bytes()).await?;
        file.flush().await?;

        Ok(ToolOutput::text(format!(
            "Wrote {} bytes to {}",
            args.content.len(),
            args.path
        )))
    }
}

#[derive(Debug, Serialize)]
struct DirEntry {
    name: String,
    kind: &'static str,
    size: u64,
}

/// Lists a directory.
pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &'static str {
        "list_dir"
    }

    fn description(&self) -> &'static str {
        "List the entries of a directory on the server"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        })
    }

    async fn call(&self, args: Value) -> Result<ToolOutput, ToolError> {
        let PathArgs { path } = parse_args(args)?;

        let mut dir = tokio::fs::read_dir(&path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let meta = tokio::fs::symlink_metadata(entry.path()).await?;
            let kind = if meta.is_symlink() {
                "symlink"
            } else if meta.is_dir() {
                "dir"
            } else {
                "file"
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(ToolOutput::json(&serde_json::to_value(entries).map_err(|e| ToolError::Io(e.into()))?))
    }
}
