// MCP (Model Context Protocol) server for OpenPact
// Exposes the feature-gated tool registry to agent clients over JSON-RPC.

mod codec;
pub mod error;
pub mod protocol;
pub mod sanitize;
pub mod server;
pub mod tools;

pub use error::{McpError, RegistryError, ToolError};
pub use sanitize::Sanitizer;
pub use server::{McpServer, ResponseWriter, ServeOutcome, ShutdownHandle};
pub use tools::{builtin_catalog, ToolRegistry};
