// Script tools: enumerate and read files in the scripts directory

use crate::error::ToolError;
use crate::protocol::CallToolResult;
use crate::tools::{
    json_schema_object, json_schema_string, resolve_within, PathGrant, ToolDescriptor, ToolHandler,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Deepest directory level searched for scripts
const MAX_DEPTH: usize = 8;

/// A script file, named by its path relative to the scripts directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub name: String,
    pub size: u64,
}

/// Enumerate scripts, skipping hidden files and directories. A missing
/// directory has no scripts.
pub fn list_scripts(dir: &Path) -> Result<Vec<ScriptEntry>, ToolError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut scripts = Vec::new();
    let walker = WalkDir::new(dir)
        .max_depth(MAX_DEPTH)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = entry.map_err(|e| ToolError::Failed(format!("failed to scan scripts: {}", e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        scripts.push(ScriptEntry {
            name: relative.to_string_lossy().replace('\\', "/"),
            size,
        });
    }

    scripts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(scripts)
}

/// Read one script by name
pub async fn read_script(dir: &Path, name: &str) -> Result<String, ToolError> {
    if name.split('/').any(|part| part.starts_with('.')) {
        return Err(ToolError::Denied(format!("{} is hidden", name)));
    }
    let path = resolve_within(dir, name)?;
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ToolError::NotFound(name.to_string())),
        Err(e) => Err(ToolError::io(format!("failed to read {}", path.display()), e)),
    }
}

pub fn list_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "scripts_list",
        "List the scripts available to the assistant",
        json_schema_object(serde_json::json!({}), vec![]),
        |paths| Ok(Arc::new(ScriptsListTool { dir: paths.get(PathGrant::Scripts)? }) as Arc<dyn ToolHandler>),
    )
    .requires("scripts")
    .grant(PathGrant::Scripts)
}

pub fn read_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "script_read",
        "Read the source of a script",
        json_schema_object(
            serde_json::json!({
                "name": json_schema_string("Script name as returned by scripts_list")
            }),
            vec!["name"],
        ),
        |paths| Ok(Arc::new(ScriptReadTool { dir: paths.get(PathGrant::Scripts)? }) as Arc<dyn ToolHandler>),
    )
    .requires("scripts")
    .grant(PathGrant::Scripts)
}

pub struct ScriptsListTool {
    dir: PathBuf,
}

#[async_trait::async_trait]
impl ToolHandler for ScriptsListTool {
    async fn execute(&self, _arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let dir = self.dir.clone();
        let scripts = tokio::task::spawn_blocking(move || list_scripts(&dir))
            .await
            .map_err(|e| ToolError::Failed(format!("script scan aborted: {}", e)))??;

        if scripts.is_empty() {
            return Ok(CallToolResult::text("No scripts found."));
        }
        let lines: Vec<_> = scripts
            .iter()
            .map(|s| format!("{} ({} bytes)", s.name, s.size))
            .collect();
        Ok(CallToolResult::text(format!(
            "Scripts ({}):\n{}",
            scripts.len(),
            lines.join("\n")
        )))
    }
}

#[derive(Debug, Deserialize)]
struct ReadArgs {
    name: String,
}

pub struct ScriptReadTool {
    dir: PathBuf,
}

#[async_trait::async_trait]
impl ToolHandler for ScriptReadTool {
    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let args: ReadArgs = serde_json::from_value(arguments)?;
        let source = read_script(&self.dir, &args.name).await?;
        Ok(CallToolResult::text(source))
    }
}
