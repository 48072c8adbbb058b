// Error types for the MCP engine, registry and tool handlers

use crate::protocol::{INTERNAL_ERROR, INVALID_PARAMS};
use crate::tools::PathGrant;

/// Unrecoverable serve loop and startup failures
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("failed to read input stream: {0}")]
    Input(#[source] std::io::Error),

    #[error("output stream closed")]
    OutputClosed,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Registry construction failures
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("tool '{tool}' uses the {grant} path without declaring it")]
    MissingGrant { tool: String, grant: PathGrant },

    #[error("failed to initialize tool '{tool}': {message}")]
    Init { tool: String, message: String },
}

/// Failure of a single tool invocation
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("access denied: {0}")]
    Denied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// JSON-RPC error code reported for this failure
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidArguments(_) => INVALID_PARAMS,
            _ => INTERNAL_ERROR,
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidArguments(e.to_string())
    }
}
