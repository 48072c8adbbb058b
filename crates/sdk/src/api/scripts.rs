//! Scripts API endpoints.

use crate::client::OpenPactClient;
use crate::error::OpenPactResult;
use serde::{Deserialize, Serialize};

/// Scripts API for reading the workspace's scripts directory.
pub struct ScriptsApi<'a> {
    client: &'a OpenPactClient,
}

impl<'a> ScriptsApi<'a> {
    pub(crate) fn new(client: &'a OpenPactClient) -> Self {
        Self { client }
    }

    /// List scripts, named by path relative to the scripts directory.
    pub async fn list(&self) -> OpenPactResult<Vec<ScriptInfo>> {
        let response: ListScriptsResponse = self.client.get_authed("/api/scripts").await?;
        Ok(response.scripts)
    }

    /// Read a script's source.
    pub async fn get(&self, name: &str) -> OpenPactResult<Script> {
        let path = format!("/api/scripts/{}", name.trim_start_matches('/'));
        self.client.get_authed(&path).await
    }
}

/// A script file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptInfo {
    pub name: String,
    pub size: u64,
}

/// A script with its source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub name: String,
    pub source: String,
}

#[derive(Debug, Deserialize)]
struct ListScriptsResponse {
    scripts: Vec<ScriptInfo>,
}
