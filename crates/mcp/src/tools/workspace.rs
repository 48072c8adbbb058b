// Workspace tools for reading and writing files under the workspace root

use crate::error::ToolError;
use crate::protocol::CallToolResult;
use crate::tools::{
    json_schema_object, json_schema_string, resolve_within, PathGrant, ToolDescriptor, ToolHandler,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Largest file returned by `workspace_read`
const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Deny list of secret-looking path fragments
const DENY_PATTERNS: &[&str] = &[
    ".env",
    "credentials",
    "secrets",
    "id_rsa",
    "id_ed25519",
    ".pem",
    ".key",
    "password",
    "token",
    "api_key",
    ".git/config",
];

/// Whether a workspace-relative path looks like it holds credentials
fn is_secret_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    DENY_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Refuse `path` when it falls under an excluded directory, comparing both
/// the lexical path and its resolved form so symlinks cannot bypass the check
fn deny_excluded(path: &Path, excluded: &[PathBuf], requested: &str) -> Result<(), ToolError> {
    let resolved = resolve_existing_prefix(path);
    let hit = excluded.iter().any(|dir| {
        path.starts_with(dir)
            || dir
                .canonicalize()
                .is_ok_and(|dir| resolved.as_ref().is_some_and(|r| r.starts_with(&dir)))
    });
    if hit {
        return Err(ToolError::Denied(format!("{} is in a restricted directory", requested)));
    }
    Ok(())
}

/// Canonicalize the longest existing ancestor of `path` and re-append the rest
fn resolve_existing_prefix(path: &Path) -> Option<PathBuf> {
    path.ancestors().find_map(|ancestor| {
        let canonical = ancestor.canonicalize().ok()?;
        let rest = path.strip_prefix(ancestor).ok()?;
        Some(canonical.join(rest))
    })
}

pub fn read_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "workspace_read",
        "Read a file or list a directory in the workspace. Cannot read secret files (.env, credentials, private keys, etc.)",
        json_schema_object(
            serde_json::json!({
                "path": json_schema_string("Path relative to the workspace root")
            }),
            vec!["path"],
        ),
        |paths| {
            let tool = WorkspaceReadTool::new(paths.get(PathGrant::Workspace)?).excluding(paths.reserved());
            Ok(Arc::new(tool) as Arc<dyn ToolHandler>)
        },
    )
    .grant(PathGrant::Workspace)
}

pub fn write_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "workspace_write",
        "Write a text file in the workspace, creating parent directories as needed",
        json_schema_object(
            serde_json::json!({
                "path": json_schema_string("Path relative to the workspace root"),
                "content": json_schema_string("Full file content")
            }),
            vec!["path", "content"],
        ),
        |paths| {
            let tool = WorkspaceWriteTool::new(paths.get(PathGrant::Workspace)?).excluding(paths.reserved());
            Ok(Arc::new(tool) as Arc<dyn ToolHandler>)
        },
    )
    .requires("workspace_write")
    .grant(PathGrant::Workspace)
}

/// Tool to read files from the workspace
pub struct WorkspaceReadTool {
    root: PathBuf,
    excluded: Vec<PathBuf>,
}

impl WorkspaceReadTool {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            excluded: Vec::new(),
        }
    }

    /// Refuse anything under `dirs`, even though they sit in the workspace
    pub fn excluding(mut self, dirs: &[PathBuf]) -> Self {
        self.excluded.extend(dirs.iter().cloned());
        self
    }
}

#[derive(Debug, Deserialize)]
struct ReadArgs {
    path: String,
}

#[async_trait::async_trait]
impl ToolHandler for WorkspaceReadTool {
    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let args: ReadArgs = serde_json::from_value(arguments)?;

        if is_secret_path(&args.path) {
            return Err(ToolError::Denied(format!("{} appears to be a secret file", args.path)));
        }
        let path = resolve_within(&self.root, &args.path)?;
        deny_excluded(&path, &self.excluded, &args.path)?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::NotFound(args.path));
            }
            Err(e) => return Err(ToolError::io(format!("failed to stat {}", path.display()), e)),
        };

        if metadata.is_dir() {
            let entries = list_dir(&path).await?;
            return Ok(CallToolResult::text(format!(
                "Directory: {}\n\nContents ({} items):\n{}",
                args.path,
                entries.len(),
                entries.join("\n")
            )));
        }

        if metadata.len() > MAX_READ_BYTES {
            return Ok(CallToolResult::text(format!(
                "File: {} ({} bytes)\n\nFile is too large to display (limit {} bytes).",
                args.path,
                metadata.len(),
                MAX_READ_BYTES
            )));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::io(format!("failed to read {}", path.display()), e))?;

        match String::from_utf8(bytes) {
            Ok(content) => Ok(CallToolResult::text(format!(
                "File: {} ({} lines)\n\n{}",
                args.path,
                content.lines().count(),
                content
            ))),
            Err(e) => Ok(CallToolResult::text(format!(
                "File: {} (binary, {} bytes)\n\nBinary files cannot be displayed as text.",
                args.path,
                e.as_bytes().len()
            ))),
        }
    }
}

async fn list_dir(path: &Path) -> Result<Vec<String>, ToolError> {
    let mut dir = tokio::fs::read_dir(path)
        .await
        .map_err(|e| ToolError::io(format!("failed to read directory {}", path.display()), e))?;

    let mut entries = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| ToolError::io(format!("failed to read directory {}", path.display()), e))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        entries.push(format!("{}{}", name, if is_dir { "/" } else { "" }));
    }
    entries.sort();
    Ok(entries)
}

/// Tool to write text files into the workspace
pub struct WorkspaceWriteTool {
    root: PathBuf,
    excluded: Vec<PathBuf>,
}

impl WorkspaceWriteTool {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            excluded: Vec::new(),
        }
    }

    pub fn excluding(mut self, dirs: &[PathBuf]) -> Self {
        self.excluded.extend(dirs.iter().cloned());
        self
    }
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[async_trait::async_trait]
impl ToolHandler for WorkspaceWriteTool {
    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let args: WriteArgs = serde_json::from_value(arguments)?;

        if is_secret_path(&args.path) {
            return Err(ToolError::Denied(format!("{} appears to be a secret file", args.path)));
        }
        let path = resolve_within(&self.root, &args.path)?;
        deny_excluded(&path, &self.excluded, &args.path)?;
        if path == self.root {
            return Err(ToolError::InvalidArguments("path must name a file".to_string()));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::io(format!("failed to create {}", parent.display()), e))?;
        }
        // Parent directories may have been symlinks created since resolution
        let path = resolve_within(&self.root, &args.path)?;
        deny_excluded(&path, &self.excluded, &args.path)?;

        tokio::fs::write(&path, args.content.as_bytes())
            .await
            .map_err(|e| ToolError::io(format!("failed to write {}", path.display()), e))?;

        tracing::info!(tool = "workspace_write", "Wrote {} bytes to {}", args.content.len(), args.path);
        Ok(CallToolResult::text(format!(
            "Wrote {} bytes to {}",
            args.content.len(),
            args.path
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ToolContent;
    use tempfile::TempDir;

    fn text_of(result: &CallToolResult) -> &str {
        match &result.content[0] {
            ToolContent::Text { text } => text,
        }
    }

    #[test]
    fn test_secret_paths() {
        assert!(!is_secret_path("README.md"));
        assert!(!is_secret_path("src/main.rs"));
        assert!(is_secret_path(".env"));
        assert!(is_secret_path("config/credentials.json"));
        assert!(is_secret_path("secret.key"));
        assert!(is_secret_path(".git/config"));
    }

    #[tokio::test]
    async fn test_read_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("test.txt"), "Hello, world!").unwrap();

        let tool = WorkspaceReadTool::new(dir.path().to_path_buf());
        let result = tool.execute(serde_json::json!({"path": "test.txt"})).await.unwrap();

        assert!(result.is_error.is_none());
        assert!(text_of(&result).ends_with("Hello, world!"));
    }

    #[tokio::test]
    async fn test_read_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        std::fs::write(dir.path().join("file.txt"), "test").unwrap();

        let tool = WorkspaceReadTool::new(dir.path().to_path_buf());
        let result = tool.execute(serde_json::json!({"path": "."})).await.unwrap();

        assert!(text_of(&result).contains("file.txt\nsubdir/"));
    }

    #[tokio::test]
    async fn test_read_refuses_secrets_and_escapes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".env"), "KEY=1").unwrap();
        let tool = WorkspaceReadTool::new(dir.path().to_path_buf());

        assert!(matches!(
            tool.execute(serde_json::json!({"path": ".env"})).await,
            Err(ToolError::Denied(_))
        ));
        assert!(matches!(
            tool.execute(serde_json::json!({"path": "../../etc/hosts"})).await,
            Err(ToolError::Denied(_))
        ));
        assert!(matches!(
            tool.execute(serde_json::json!({"path": "missing.txt"})).await,
            Err(ToolError::NotFound(_))
        ));
        assert!(matches!(
            tool.execute(serde_json::json!({"file": "x"})).await,
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let tool = WorkspaceWriteTool::new(dir.path().to_path_buf());

        tool.execute(serde_json::json!({"path": "notes/today.md", "content": "# Today"}))
            .await
            .unwrap();

        let written = std::fs::read_to_string(dir.path().join("notes/today.md")).unwrap();
        assert_eq!(written, "# Today");
    }

    #[tokio::test]
    async fn test_data_dir_is_off_limits() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(data.join("auth")).unwrap();
        std::fs::write(data.join("auth/admin.json"), r#"{"password_hash":"abc","salt":"00"}"#).unwrap();
        std::os::unix::fs::symlink(&data, dir.path().join("shortcut")).unwrap();
        std::fs::write(dir.path().join("notes.md"), "ok").unwrap();

        let excluded = vec![data.clone()];
        let reader = WorkspaceReadTool::new(dir.path().to_path_buf()).excluding(&excluded);
        let writer = WorkspaceWriteTool::new(dir.path().to_path_buf()).excluding(&excluded);

        for path in ["data/auth/admin.json", "./data/auth", "data", "shortcut/auth/admin.json"] {
            assert!(
                matches!(reader.execute(serde_json::json!({"path": path})).await, Err(ToolError::Denied(_))),
                "read of {} was allowed",
                path
            );
        }
        for path in ["data/auth/admin.json", "data/new.json", "shortcut/auth/admin.json"] {
            assert!(
                matches!(
                    writer.execute(serde_json::json!({"path": path, "content": "{}"})).await,
                    Err(ToolError::Denied(_))
                ),
                "write to {} was allowed",
                path
            );
        }

        let admin = std::fs::read_to_string(data.join("auth/admin.json")).unwrap();
        assert!(admin.contains("password_hash"));
        assert!(!data.join("new.json").exists());
        assert!(reader.execute(serde_json::json!({"path": "notes.md"})).await.is_ok());
    }

    #[tokio::test]
    async fn test_registry_reserves_data_dir_for_workspace_tools() {
        let dir = TempDir::new().unwrap();
        let mut config = openpact_core::ServerConfig::for_workspace(dir.path());
        config.features = ["workspace_write".to_string()].into_iter().collect();
        std::fs::create_dir_all(config.data_dir.join("auth")).unwrap();
        std::fs::write(config.data_dir.join("auth/admin.json"), "{}").unwrap();

        let registry =
            crate::tools::ToolRegistry::build(&config, vec![read_descriptor(), write_descriptor()]).unwrap();
        let read = registry.get("workspace_read").unwrap().handler.clone();
        let write = registry.get("workspace_write").unwrap().handler.clone();

        assert!(matches!(
            read.execute(serde_json::json!({"path": "data/auth/admin.json"})).await,
            Err(ToolError::Denied(_))
        ));
        assert!(matches!(
            write.execute(serde_json::json!({"path": "data/auth/admin.json", "content": "{}"})).await,
            Err(ToolError::Denied(_))
        ));
    }

    #[tokio::test]
    async fn test_write_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let tool = WorkspaceWriteTool::new(dir.path().to_path_buf());

        assert!(matches!(
            tool.execute(serde_json::json!({"path": "../outside.txt", "content": "x"})).await,
            Err(ToolError::Denied(_))
        ));
        assert!(matches!(
            tool.execute(serde_json::json!({"path": ".", "content": "x"})).await,
            Err(ToolError::InvalidArguments(_))
        ));
    }
}
