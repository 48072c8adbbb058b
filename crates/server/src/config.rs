use anyhow::{Context, Result};
use openpact_core::auth::TokenAuthority;
use openpact_core::secrets::{InMemorySecretStore, SecretStore};
use openpact_core::ServerConfig;
use openpact_mcp::{builtin_catalog, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;

/// How often sessions with expired refresh tokens are swept
const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub authority: Arc<TokenAuthority>,
    pub secrets: Arc<dyn SecretStore>,
    pub tools: Arc<ToolRegistry>,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).context("Failed to create data directory")?;

        let authority =
            Arc::new(TokenAuthority::from_config(&config).context("Failed to initialize token authority")?);
        if authority.setup_required() {
            tracing::info!("No admin account yet, waiting for first-run setup");
        }

        let tools = Arc::new(
            ToolRegistry::build(&config, builtin_catalog()).context("Failed to build tool registry")?,
        );

        // The secret backend is external; this store lives for the process
        tracing::warn!("Using in-memory secret store, secrets are lost on restart");
        let secrets: Arc<dyn SecretStore> = Arc::new(InMemorySecretStore::new());

        let state = Self::from_parts(config, authority, secrets, tools);
        state.spawn_session_pruner();
        Ok(state)
    }

    pub fn from_parts(
        config: ServerConfig,
        authority: Arc<TokenAuthority>,
        secrets: Arc<dyn SecretStore>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            authority,
            secrets,
            tools,
        }
    }

    fn spawn_session_pruner(&self) {
        let authority = self.authority.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                let pruned = authority.prune_sessions(chrono::Utc::now());
                if pruned > 0 {
                    tracing::info!("Pruned {} expired sessions", pruned);
                }
            }
        });
    }
}
