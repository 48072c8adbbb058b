//! Gateway configuration endpoint.

use crate::client::OpenPactClient;
use crate::error::OpenPactResult;
use serde::{Deserialize, Serialize};

pub struct GatewayConfigApi<'a> {
    client: &'a OpenPactClient,
}

impl<'a> GatewayConfigApi<'a> {
    pub(crate) fn new(client: &'a OpenPactClient) -> Self {
        Self { client }
    }

    /// Fetch the gateway's effective configuration.
    pub async fn get(&self) -> OpenPactResult<GatewayConfig> {
        self.client.get_authed("/api/config").await
    }
}

/// Effective configuration as reported by the gateway. Directories are
/// relative to the workspace when they live inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub workspace: String,
    pub data_dir: String,
    pub scripts_dir: String,
    pub ai_data_dir: String,
    pub features: Vec<String>,
    pub dev_mode: bool,
    pub access_expiry_secs: u64,
    pub refresh_expiry_secs: u64,
}
