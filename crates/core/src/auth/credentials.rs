// Admin account storage and password verification

use super::AuthError;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use subtle::ConstantTimeEq;

/// Minimum accepted password length at setup
pub const MIN_PASSWORD_LEN: usize = 8;

const HASH_ROUNDS: u32 = 10_000;

/// Username and password presented at login or first-run setup
#[derive(Clone, Deserialize, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The single administrator account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAccount {
    pub username: String,
    /// Hex-encoded stretched SHA-256 of salt and password
    pub password_hash: String,
    /// Hex-encoded random salt
    pub salt: String,
    pub created_at: DateTime<Utc>,
}

impl AdminAccount {
    /// Create an account from setup credentials
    pub fn create(credentials: &Credentials) -> Result<Self, AuthError> {
        let username = credentials.username.trim();
        if username.is_empty() {
            return Err(AuthError::InvalidSetup("username must not be empty".to_string()));
        }
        if credentials.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidSetup(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);

        Ok(Self {
            username: username.to_string(),
            password_hash: hex::encode(hash_password(&salt, &credentials.password)),
            salt: hex::encode(salt),
            created_at: Utc::now(),
        })
    }

    /// Check credentials in constant time with respect to the password
    pub fn verify(&self, credentials: &Credentials) -> bool {
        let (Ok(salt), Ok(expected)) = (hex::decode(&self.salt), hex::decode(&self.password_hash)) else {
            return false;
        };

        let candidate = hash_password(&salt, &credentials.password);
        let password_ok: bool = candidate.as_slice().ct_eq(expected.as_slice()).into();
        let username_ok: bool = self
            .username
            .as_bytes()
            .ct_eq(credentials.username.trim().as_bytes())
            .into();

        password_ok && username_ok
    }
}

fn hash_password(salt: &[u8], password: &str) -> Vec<u8> {
    let mut digest = {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(password.as_bytes());
        hasher.finalize()
    };

    for _ in 1..HASH_ROUNDS {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(salt);
        digest = hasher.finalize();
    }

    digest.to_vec()
}

/// Holds the admin account, optionally persisted as JSON
pub struct AdminStore {
    path: Option<PathBuf>,
    account: RwLock<Option<AdminAccount>>,
}

impl AdminStore {
    /// Store that lives only for the process lifetime
    pub fn in_memory() -> Self {
        Self {
            path: None,
            account: RwLock::new(None),
        }
    }

    /// Open a store backed by `path`, loading an existing account if present
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let path = path.into();
        let account = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| AuthError::Storage(format!("failed to read admin account: {}", e)))?;
            let account: AdminAccount = serde_json::from_str(&content)
                .map_err(|e| AuthError::Storage(format!("failed to parse admin account: {}", e)))?;
            Some(account)
        } else {
            None
        };

        Ok(Self {
            path: Some(path),
            account: RwLock::new(account),
        })
    }

    pub fn get(&self) -> Option<AdminAccount> {
        self.account
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_configured(&self) -> bool {
        self.account
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Install the account. Fails once an account exists.
    pub fn create(&self, account: AdminAccount) -> Result<(), AuthError> {
        let mut slot = self.account.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(AuthError::AlreadyConfigured);
        }

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AuthError::Storage(format!("failed to create auth directory: {}", e)))?;
            }
            let content = serde_json::to_string_pretty(&account)
                .map_err(|e| AuthError::Storage(e.to_string()))?;
            std::fs::write(path, content)
                .map_err(|e| AuthError::Storage(format!("failed to write admin account: {}", e)))?;
        }

        tracing::info!("Admin account '{}' configured", account.username);
        *slot = Some(account);
        Ok(())
    }
}

impl std::fmt::Debug for AdminStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminStore")
            .field("path", &self.path)
            .field("configured", &self.is_configured())
            .finish()
    }
}
