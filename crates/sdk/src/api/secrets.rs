//! Secrets API endpoints.

use crate::client::OpenPactClient;
use crate::error::{OpenPactError, OpenPactResult};
use openpact_core::secrets::{validate_secret_name, SecretMetadata};
use serde::{Deserialize, Serialize};

/// Secrets API for managing stored secrets. Values are write-only: the
/// gateway never returns them.
pub struct SecretsApi<'a> {
    client: &'a OpenPactClient,
}

impl<'a> SecretsApi<'a> {
    pub(crate) fn new(client: &'a OpenPactClient) -> Self {
        Self { client }
    }

    /// List all secrets (metadata only).
    pub async fn list(&self) -> OpenPactResult<Vec<SecretMetadata>> {
        let response: ListSecretsResponse = self.client.get_authed("/api/secrets").await?;
        Ok(response.secrets)
    }

    /// Create or replace a secret. Each write bumps its version.
    pub async fn put(&self, name: &str, value: impl Into<String>) -> OpenPactResult<SecretMetadata> {
        let path = secret_path(name)?;
        let request = PutSecretRequest { value: value.into() };
        self.client.put_authed(&path, &request).await
    }

    /// Delete a secret.
    pub async fn delete(&self, name: &str) -> OpenPactResult<()> {
        let path = secret_path(name)?;
        self.client.delete_authed(&path).await
    }
}

fn secret_path(name: &str) -> OpenPactResult<String> {
    validate_secret_name(name).map_err(|e| OpenPactError::Config(e.to_string()))?;
    Ok(format!("/api/secrets/{}", name))
}

#[derive(Debug, Deserialize)]
struct ListSecretsResponse {
    secrets: Vec<SecretMetadata>,
}

/// Request to store a secret value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutSecretRequest {
    pub value: String,
}
