//! # OpenPact SDK
//!
//! Rust client for the OpenPact admin gateway.
//!
//! The client keeps the access/refresh token pair for you. When a protected
//! call comes back with `token_expired`, it refreshes once (shared by every
//! concurrent caller on the same client) and retries the call with the new
//! access token. If the refresh itself fails, the tokens are discarded and
//! every waiting call fails with [`OpenPactError::SessionExpired`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use openpact_sdk::{OpenPactClient, OpenPactResult};
//!
//! #[tokio::main]
//! async fn main() -> OpenPactResult<()> {
//!     let client = OpenPactClient::builder()
//!         .base_url("http://127.0.0.1:8080")
//!         .build()?;
//!
//!     let health = client.health().check().await?;
//!     println!("Gateway status: {}", health.status);
//!
//!     client.session().login("admin", "correct horse battery").await?;
//!
//!     client.secrets().put("OPENAI_API_KEY", "sk-...").await?;
//!     for secret in client.secrets().list().await? {
//!         println!("{} (v{})", secret.name, secret.version);
//!     }
//!
//!     client.session().logout().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod transport;

// Re-export main client
pub use client::{OpenPactClient, OpenPactClientBuilder};
pub use config::{ClientConfig, RetryConfig};
pub use error::{OpenPactError, OpenPactResult};

// Re-export core types for convenience
pub use openpact_core::auth::{RefreshFailed, TokenPair};
pub use openpact_core::secrets::SecretMetadata;
