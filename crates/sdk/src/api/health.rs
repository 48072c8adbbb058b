//! Health API endpoints.

use crate::client::OpenPactClient;
use crate::error::OpenPactResult;
use serde::{Deserialize, Serialize};

/// Health API for checking gateway status.
pub struct HealthApi<'a> {
    client: &'a OpenPactClient,
}

impl<'a> HealthApi<'a> {
    pub(crate) fn new(client: &'a OpenPactClient) -> Self {
        Self { client }
    }

    /// Check basic health status. Needs no credentials.
    pub async fn check(&self) -> OpenPactResult<HealthCheck> {
        self.client.http.get("/api/health", None).await
    }
}

/// Basic health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub service: String,
    pub version: String,
}
