// Secret storage contract used by the admin gateway

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Longest accepted secret name
pub const MAX_SECRET_NAME_LEN: usize = 128;

/// Secret store errors
#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("invalid secret name: {0}")]
    InvalidName(String),

    #[error("secret backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, SecretStoreError>;

/// Everything about a secret except its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub name: String,
    /// SHA-256 of the value, hex encoded
    pub value_hash: String,
    /// Incremented on every write
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Backend holding named secret values
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Metadata for every secret, ordered by name
    async fn list(&self) -> Result<Vec<SecretMetadata>>;

    /// Secret value, or `None` if absent
    async fn get(&self, name: &str) -> Result<Option<String>>;

    /// Create or overwrite a secret
    async fn put(&self, name: &str, value: String) -> Result<SecretMetadata>;

    /// Remove a secret. Removing an absent secret is `NotFound`.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Secret names are used as environment-style identifiers
pub fn validate_secret_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_SECRET_NAME_LEN {
        return Err(SecretStoreError::InvalidName(format!(
            "name must be 1-{} characters",
            MAX_SECRET_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(SecretStoreError::InvalidName(format!(
            "'{}' may only contain letters, digits, '_', '-' and '.'",
            name
        )));
    }
    if name.starts_with('.') {
        return Err(SecretStoreError::InvalidName(format!("'{}' must not start with '.'", name)));
    }
    Ok(())
}

/// Hash a value for metadata
pub fn hash_value(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
struct StoredSecret {
    value: String,
    metadata: SecretMetadata,
}

/// Process-local secret store for dev mode and tests
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<BTreeMap<String, StoredSecret>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn list(&self) -> Result<Vec<SecretMetadata>> {
        Ok(self
            .secrets
            .read()
            .await
            .values()
            .map(|s| s.metadata.clone())
            .collect())
    }

    async fn get(&self, name: &str) -> Result<Option<String>> {
        validate_secret_name(name)?;
        Ok(self.secrets.read().await.get(name).map(|s| s.value.clone()))
    }

    async fn put(&self, name: &str, value: String) -> Result<SecretMetadata> {
        validate_secret_name(name)?;
        let now = Utc::now();
        let value_hash = hash_value(&value);

        let mut secrets = self.secrets.write().await;
        let metadata = match secrets.get(name) {
            Some(existing) => SecretMetadata {
                value_hash,
                version: existing.metadata.version + 1,
                updated_at: now,
                ..existing.metadata.clone()
            },
            None => SecretMetadata {
                name: name.to_string(),
                value_hash,
                version: 1,
                created_at: now,
                updated_at: now,
            },
        };

        secrets.insert(
            name.to_string(),
            StoredSecret {
                value,
                metadata: metadata.clone(),
            },
        );

        tracing::info!("Stored secret: {} (version {})", name, metadata.version);
        Ok(metadata)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        validate_secret_name(name)?;
        self.secrets
            .write()
            .await
            .remove(name)
            .map(|_| tracing::info!("Deleted secret: {}", name))
            .ok_or_else(|| SecretStoreError::NotFound(name.to_string()))
    }
}

impl std::fmt::Debug for InMemorySecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySecretStore").finish_non_exhaustive()
    }
}
