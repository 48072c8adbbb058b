// Memory tools: the agent's long-lived notes in the AI data directory

use crate::error::ToolError;
use crate::protocol::CallToolResult;
use crate::tools::{json_schema_object, json_schema_string, PathGrant, ToolDescriptor, ToolHandler};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const MEMORY_FILE: &str = "MEMORY.md";

/// Serializes writers of the memory file within this process
pub struct MemoryFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl MemoryFile {
    pub fn new(ai_data_dir: PathBuf) -> Self {
        Self {
            path: ai_data_dir.join(MEMORY_FILE),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<String, ToolError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(ToolError::io(format!("failed to read {}", self.path.display()), e)),
        }
    }

    async fn write(&self, content: &str, mode: WriteMode) -> Result<usize, ToolError> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::io(format!("failed to create {}", parent.display()), e))?;
        }

        match mode {
            WriteMode::Replace => tokio::fs::write(&self.path, content)
                .await
                .map_err(|e| ToolError::io(format!("failed to write {}", self.path.display()), e))?,
            WriteMode::Append => {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await
                    .map_err(|e| ToolError::io(format!("failed to open {}", self.path.display()), e))?;
                let mut entry = content.to_string();
                if !entry.ends_with('\n') {
                    entry.push('\n');
                }
                file.write_all(entry.as_bytes())
                    .await
                    .map_err(|e| ToolError::io(format!("failed to append to {}", self.path.display()), e))?;
                file.flush()
                    .await
                    .map_err(|e| ToolError::io(format!("failed to flush {}", self.path.display()), e))?;
            }
        }

        Ok(content.len())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Append,
    Replace,
}

pub fn read_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "memory_read",
        "Read the assistant's persistent memory notes",
        json_schema_object(serde_json::json!({}), vec![]),
        |paths| {
            let file = MemoryFile::new(paths.get(PathGrant::AiData)?);
            Ok(Arc::new(MemoryReadTool { file }) as Arc<dyn ToolHandler>)
        },
    )
    .requires("memory")
    .grant(PathGrant::AiData)
}

pub fn write_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "memory_write",
        "Append to or replace the assistant's persistent memory notes",
        json_schema_object(
            serde_json::json!({
                "content": json_schema_string("Text to store"),
                "mode": {
                    "type": "string",
                    "enum": ["append", "replace"],
                    "description": "append (default) or replace the whole file"
                }
            }),
            vec!["content"],
        ),
        |paths| {
            let file = MemoryFile::new(paths.get(PathGrant::AiData)?);
            Ok(Arc::new(MemoryWriteTool { file }) as Arc<dyn ToolHandler>)
        },
    )
    .requires("memory")
    .grant(PathGrant::AiData)
}

pub struct MemoryReadTool {
    file: MemoryFile,
}

#[async_trait::async_trait]
impl ToolHandler for MemoryReadTool {
    async fn execute(&self, _arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let content = self.file.read().await?;
        if content.trim().is_empty() {
            return Ok(CallToolResult::text("Memory is empty."));
        }
        Ok(CallToolResult::text(content))
    }
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    content: String,
    #[serde(default)]
    mode: WriteMode,
}

pub struct MemoryWriteTool {
    file: MemoryFile,
}

#[async_trait::async_trait]
impl ToolHandler for MemoryWriteTool {
    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let args: WriteArgs = serde_json::from_value(arguments)?;
        let written = self.file.write(&args.content, args.mode).await?;

        tracing::debug!(tool = "memory_write", mode = ?args.mode, "Stored {} bytes of memory", written);
        Ok(CallToolResult::text(format!("Stored {} bytes ({:?}).", written, args.mode)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ToolContent;
    use tempfile::TempDir;

    fn text_of(result: &CallToolResult) -> String {
        match &result.content[0] {
            ToolContent::Text { text } => text.clone(),
        }
    }

    #[tokio::test]
    async fn test_empty_memory() {
        let dir = TempDir::new().unwrap();
        let tool = MemoryReadTool {
            file: MemoryFile::new(dir.path().to_path_buf()),
        };
        let result = tool.execute(serde_json::json!({})).await.unwrap();
        assert_eq!(text_of(&result), "Memory is empty.");
    }

    #[tokio::test]
    async fn test_append_then_replace() {
        let dir = TempDir::new().unwrap();
        let ai_data = dir.path().join("ai-data");
        let writer = MemoryWriteTool {
            file: MemoryFile::new(ai_data.clone()),
        };
        let reader = MemoryReadTool {
            file: MemoryFile::new(ai_data.clone()),
        };

        writer.execute(serde_json::json!({"content": "- likes tea"})).await.unwrap();
        writer.execute(serde_json::json!({"content": "- lives in Oslo"})).await.unwrap();
        assert_eq!(
            text_of(&reader.execute(serde_json::json!({})).await.unwrap()),
            "- likes tea\n- lives in Oslo\n"
        );

        writer
            .execute(serde_json::json!({"content": "# Fresh", "mode": "replace"}))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(ai_data.join(MEMORY_FILE)).unwrap(), "# Fresh");
    }

    #[tokio::test]
    async fn test_rejects_unknown_mode() {
        let dir = TempDir::new().unwrap();
        let writer = MemoryWriteTool {
            file: MemoryFile::new(dir.path().to_path_buf()),
        };
        assert!(matches!(
            writer.execute(serde_json::json!({"content": "x", "mode": "prepend"})).await,
            Err(ToolError::InvalidArguments(_))
        ));
    }
}
