pub mod memory;
pub mod scripts;
pub mod web;
pub mod workspace;
mod registry;

pub use registry::{
    json_schema_boolean, json_schema_object, json_schema_string, resolve_within, HandlerFactory,
    PathGrant, RegisteredTool, ToolDescriptor, ToolHandler, ToolPaths, ToolRegistry,
};

/// Every tool this server knows about, before feature gating
pub fn builtin_catalog() -> Vec<ToolDescriptor> {
    vec![
        workspace::read_descriptor(),
        workspace::write_descriptor(),
        memory::read_descriptor(),
        memory::write_descriptor(),
        scripts::list_descriptor(),
        scripts::read_descriptor(),
        web::fetch_descriptor(
            web::DEFAULT_ALLOWED_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use openpact_core::ServerConfig;

    #[test]
    fn test_builtin_catalog_gating() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = ServerConfig::for_workspace(dir.path());

        let registry = ToolRegistry::build(&config, builtin_catalog()).unwrap();
        let names: Vec<_> = registry.list_schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["workspace_read"]);

        config.features = ["memory", "scripts", "web", "workspace_write"]
            .iter()
            .map(|f| f.to_string())
            .collect();
        let registry = ToolRegistry::build(&config, builtin_catalog()).unwrap();
        assert_eq!(registry.len(), 7);
    }
}
