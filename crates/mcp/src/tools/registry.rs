// Tool descriptors and the feature-gated registry built from them

use crate::error::{RegistryError, ToolError};
use crate::protocol::{CallToolResult, ToolSchema};
use openpact_core::ServerConfig;
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Tool executor trait
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with given arguments
    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult, ToolError>;
}

/// Directories a tool may ask to be handed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathGrant {
    Workspace,
    Data,
    Scripts,
    AiData,
}

impl std::fmt::Display for PathGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Workspace => "workspace",
            Self::Data => "data",
            Self::Scripts => "scripts",
            Self::AiData => "ai-data",
        };
        f.write_str(name)
    }
}

/// The subset of configured directories granted to one tool
#[derive(Debug, Clone, Default)]
pub struct ToolPaths {
    tool: String,
    granted: HashMap<PathGrant, PathBuf>,
    /// Directories the tool must not reach through a broader grant
    reserved: Vec<PathBuf>,
}

impl ToolPaths {
    fn for_tool(tool: &str, grants: &[PathGrant], config: &ServerConfig) -> Self {
        let granted = grants
            .iter()
            .map(|grant| {
                let path = match grant {
                    PathGrant::Workspace => &config.workspace_path,
                    PathGrant::Data => &config.data_dir,
                    PathGrant::Scripts => &config.scripts_dir,
                    PathGrant::AiData => &config.ai_data_dir,
                };
                (*grant, path.clone())
            })
            .collect();
        // Auth state lives under the data dir; only a Data grant reaches it
        let reserved = if grants.contains(&PathGrant::Data) {
            Vec::new()
        } else {
            vec![config.data_dir.clone()]
        };
        Self {
            tool: tool.to_string(),
            granted,
            reserved,
        }
    }

    /// A granted directory. Asking for an undeclared one fails registry
    /// construction.
    pub fn get(&self, grant: PathGrant) -> Result<PathBuf, RegistryError> {
        self.granted
            .get(&grant)
            .cloned()
            .ok_or_else(|| RegistryError::MissingGrant {
                tool: self.tool.clone(),
                grant,
            })
    }

    /// Directories excluded from this tool even when a granted root
    /// contains them
    pub fn reserved(&self) -> &[PathBuf] {
        &self.reserved
    }
}

/// Builds a handler from the paths granted to it
pub type HandlerFactory =
    Arc<dyn Fn(&ToolPaths) -> Result<Arc<dyn ToolHandler>, RegistryError> + Send + Sync>;

/// Static description of a tool before feature gating
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub required_flags: BTreeSet<String>,
    pub grants: Vec<PathGrant>,
    pub factory: HandlerFactory,
}

impl ToolDescriptor {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        factory: F,
    ) -> Self
    where
        F: Fn(&ToolPaths) -> Result<Arc<dyn ToolHandler>, RegistryError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            required_flags: BTreeSet::new(),
            grants: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    /// Only expose the tool when `flag` is enabled
    pub fn requires(mut self, flag: impl Into<String>) -> Self {
        self.required_flags.insert(flag.into());
        self
    }

    pub fn grant(mut self, grant: PathGrant) -> Self {
        if !self.grants.contains(&grant) {
            self.grants.push(grant);
        }
        self
    }

    pub fn is_enabled(&self, features: &BTreeSet<String>) -> bool {
        self.required_flags.is_subset(features)
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("required_flags", &self.required_flags)
            .field("grants", &self.grants)
            .finish_non_exhaustive()
    }
}

/// A tool that passed the feature gate
#[derive(Clone)]
pub struct RegisteredTool {
    pub schema: ToolSchema,
    pub required_flags: BTreeSet<String>,
    pub handler: Arc<dyn ToolHandler>,
}

/// Enabled tools by name. Built once and never mutated.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Registry with no tools
    pub fn empty() -> Self {
        Self::default()
    }

    /// Apply the feature gate to `catalog` and instantiate every enabled
    /// tool with its granted paths
    pub fn build(config: &ServerConfig, catalog: Vec<ToolDescriptor>) -> Result<Self, RegistryError> {
        let mut seen = BTreeSet::new();
        let mut tools = HashMap::new();

        for descriptor in catalog {
            if !seen.insert(descriptor.name.clone()) {
                return Err(RegistryError::DuplicateTool(descriptor.name));
            }
            if !descriptor.is_enabled(&config.features) {
                tracing::debug!(
                    tool = %descriptor.name,
                    "Tool disabled, missing flags: {:?}",
                    descriptor.required_flags.difference(&config.features).collect::<Vec<_>>()
                );
                continue;
            }

            let paths = ToolPaths::for_tool(&descriptor.name, &descriptor.grants, config);
            let handler = (descriptor.factory)(&paths)?;

            tools.insert(
                descriptor.name.clone(),
                RegisteredTool {
                    schema: ToolSchema {
                        name: descriptor.name,
                        description: descriptor.description,
                        input_schema: descriptor.input_schema,
                    },
                    required_flags: descriptor.required_flags,
                    handler,
                },
            );
        }

        tracing::info!("Registered {} tools", tools.len());
        Ok(Self { tools })
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All tool schemas, sorted by name
    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<_> = self.tools.values().map(|t| t.schema.clone()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Enabled tools, sorted by name
    pub fn list(&self) -> Vec<&RegisteredTool> {
        let mut tools: Vec<_> = self.tools.values().collect();
        tools.sort_by(|a, b| a.schema.name.cmp(&b.schema.name));
        tools
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

/// Resolve a caller-supplied relative path inside `root`. Rejects absolute
/// paths, parent components and symlinks that lead outside the root.
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf, ToolError> {
    let relative = relative.trim();
    let candidate = Path::new(relative);

    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(ToolError::Denied(format!(
                    "{} must be a relative path inside the directory",
                    relative
                )))
            }
        }
    }

    let path = root.join(candidate);
    if path.exists() {
        let canonical = path
            .canonicalize()
            .map_err(|e| ToolError::io(format!("failed to resolve {}", relative), e))?;
        let canonical_root = root
            .canonicalize()
            .map_err(|e| ToolError::io("failed to resolve root directory", e))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(ToolError::Denied(format!("{} resolves outside the directory", relative)));
        }
    }

    Ok(path)
}

// Helper functions for creating tool schemas

pub fn json_schema_object(properties: serde_json::Value, required: Vec<&str>) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

pub fn json_schema_string(description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "string",
        "description": description
    })
}

pub fn json_schema_boolean(description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "boolean",
        "description": description
    })
}
