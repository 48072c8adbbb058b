//! Main client for the OpenPact SDK.

use crate::api::*;
use crate::auth::HttpRefresher;
use crate::config::{ClientConfig, RetryConfig};
use crate::error::{OpenPactError, OpenPactResult};
use crate::transport::HttpTransport;
use openpact_core::auth::{AuthSession, TokenPair, DEFAULT_MAX_REFRESH_RETRIES};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Main client for interacting with the OpenPact admin gateway.
///
/// Clones share one token session, so a refresh triggered through any clone
/// is seen by all of them.
#[derive(Clone)]
pub struct OpenPactClient {
    config: Arc<ClientConfig>,
    pub(crate) http: HttpTransport,
    pub(crate) auth: Arc<AuthSession<HttpRefresher>>,
}

impl OpenPactClient {
    /// Create a new client builder.
    pub fn builder() -> OpenPactClientBuilder {
        OpenPactClientBuilder::new()
    }

    /// Create a client from configuration.
    fn from_config(config: ClientConfig) -> OpenPactResult<Self> {
        let config = Arc::new(config);
        let http = HttpTransport::new(config.clone())?;
        let auth = AuthSession::new(HttpRefresher::new(http.clone()))
            .with_max_refresh_retries(config.max_refresh_retries);

        Ok(Self {
            config,
            http,
            auth: Arc::new(auth),
        })
    }

    /// The configuration this client was built with.
    pub fn client_config(&self) -> &ClientConfig {
        &self.config
    }

    /// Currently installed tokens, if any.
    pub fn tokens(&self) -> Option<TokenPair> {
        self.auth.tokens()
    }

    /// Install tokens obtained elsewhere, e.g. persisted from a previous run.
    pub fn set_tokens(&self, tokens: TokenPair) {
        self.auth.install(tokens);
    }

    /// Whether tokens are installed.
    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// Get the session API (setup, login, logout).
    pub fn session(&self) -> SessionApi<'_> {
        SessionApi::new(self)
    }

    /// Get the health API.
    pub fn health(&self) -> HealthApi<'_> {
        HealthApi::new(self)
    }

    /// Get the gateway configuration API.
    pub fn config(&self) -> GatewayConfigApi<'_> {
        GatewayConfigApi::new(self)
    }

    /// Get the tools API.
    pub fn tools(&self) -> ToolsApi<'_> {
        ToolsApi::new(self)
    }

    /// Get the secrets API.
    pub fn secrets(&self) -> SecretsApi<'_> {
        SecretsApi::new(self)
    }

    /// Get the scripts API.
    pub fn scripts(&self) -> ScriptsApi<'_> {
        ScriptsApi::new(self)
    }

    pub(crate) async fn get_authed<T: DeserializeOwned>(&self, path: &str) -> OpenPactResult<T> {
        self.auth
            .call(path, |token| async move { self.http.get(path, Some(&token)).await })
            .await
            .map_err(OpenPactError::from)
    }

    pub(crate) async fn put_authed<T, B>(&self, path: &str, body: &B) -> OpenPactResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.auth
            .call(path, |token| async move { self.http.put(path, Some(&token), body).await })
            .await
            .map_err(OpenPactError::from)
    }

    pub(crate) async fn delete_authed(&self, path: &str) -> OpenPactResult<()> {
        self.auth
            .call(path, |token| async move {
                self.http.delete_no_response(path, Some(&token)).await
            })
            .await
            .map_err(OpenPactError::from)
    }
}

/// Builder for creating an OpenPactClient.
pub struct OpenPactClientBuilder {
    base_url: Option<String>,
    timeout: Duration,
    retry_config: RetryConfig,
    max_refresh_retries: u32,
    tokens: Option<TokenPair>,
}

impl OpenPactClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            retry_config: RetryConfig::default(),
            max_refresh_retries: DEFAULT_MAX_REFRESH_RETRIES,
            tokens: None,
        }
    }

    /// Set the base URL of the admin gateway.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry configuration for transient failures.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Set how many refresh-and-retry cycles one call may trigger.
    pub fn max_refresh_retries(mut self, retries: u32) -> Self {
        self.max_refresh_retries = retries;
        self
    }

    /// Start with an existing token pair.
    pub fn tokens(mut self, tokens: TokenPair) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Build the client.
    pub fn build(self) -> OpenPactResult<OpenPactClient> {
        let base_url_str = self
            .base_url
            .ok_or_else(|| OpenPactError::Config("base_url is required".to_string()))?;

        let base_url = Url::parse(&base_url_str)?;

        let config = ClientConfig {
            base_url,
            timeout: self.timeout,
            retry_config: self.retry_config,
            max_refresh_retries: self.max_refresh_retries,
        };

        let client = OpenPactClient::from_config(config)?;
        if let Some(tokens) = self.tokens {
            client.set_tokens(tokens);
        }
        Ok(client)
    }
}

impl Default for OpenPactClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
