//! Tools API endpoints.

use crate::client::OpenPactClient;
use crate::error::OpenPactResult;
use serde::{Deserialize, Serialize};

/// Tools API for inspecting the MCP tool catalog.
pub struct ToolsApi<'a> {
    client: &'a OpenPactClient,
}

impl<'a> ToolsApi<'a> {
    pub(crate) fn new(client: &'a OpenPactClient) -> Self {
        Self { client }
    }

    /// List the tools enabled under the gateway's feature flags.
    pub async fn list(&self) -> OpenPactResult<Vec<ToolInfo>> {
        let response: ListToolsResponse = self.client.get_authed("/api/tools").await?;
        Ok(response.tools)
    }
}

/// An enabled tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required_flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ListToolsResponse {
    tools: Vec<ToolInfo>,
}
