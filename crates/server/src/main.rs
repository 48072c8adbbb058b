use anyhow::{Context, Result};
use clap::Parser;
use openpact_core::{ConfigOverrides, ServerConfig};
use std::path::PathBuf;

mod api;
mod config;
mod middleware;

use config::AppState;

#[derive(Parser, Debug)]
#[command(name = "openpact")]
#[command(about = "OpenPact admin gateway", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "OPENPACT_CONFIG", default_value = "openpact.toml")]
    config: PathBuf,

    /// Workspace root directory
    #[arg(short, long, env = "OPENPACT_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Data directory (default: <workspace>/data)
    #[arg(long, env = "OPENPACT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Scripts directory (default: <workspace>/scripts)
    #[arg(long, env = "OPENPACT_SCRIPTS_DIR")]
    scripts_dir: Option<PathBuf>,

    /// AI data directory (default: <workspace>/ai-data)
    #[arg(long, env = "OPENPACT_AI_DATA_DIR")]
    ai_data_dir: Option<PathBuf>,

    /// Comma-separated feature flags
    #[arg(long, env = "OPENPACT_FEATURES")]
    features: Option<String>,

    /// Address to bind the admin gateway to
    #[arg(short, long, env = "OPENPACT_BIND")]
    bind: Option<String>,

    /// Development mode (ephemeral signing key)
    #[arg(long, env = "OPENPACT_DEV_MODE")]
    dev_mode: Option<bool>,

    /// Access token lifetime, e.g. 15m
    #[arg(long, env = "OPENPACT_ACCESS_EXPIRY")]
    access_expiry: Option<String>,

    /// Refresh token lifetime, e.g. 7d
    #[arg(long, env = "OPENPACT_REFRESH_EXPIRY")]
    refresh_expiry: Option<String>,
}

impl Args {
    fn into_overrides(self) -> (PathBuf, ConfigOverrides) {
        let overrides = ConfigOverrides {
            workspace: self.workspace,
            data_dir: self.data_dir,
            scripts_dir: self.scripts_dir,
            ai_data_dir: self.ai_data_dir,
            features: self.features,
            bind_address: self.bind,
            dev_mode: self.dev_mode,
            access_expiry: self.access_expiry,
            refresh_expiry: self.refresh_expiry,
        };
        (self.config, overrides)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "openpact=info,openpact_server=info,tower_http=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let (config_path, overrides) = Args::parse().into_overrides();

    tracing::info!("Starting OpenPact admin gateway");

    let config = ServerConfig::load(Some(&config_path), overrides).context("Invalid configuration")?;
    tracing::info!("Workspace: {}", config.workspace_path.display());
    tracing::info!("Features: {:?}", config.features);

    let addr = config.bind_address;
    let state = AppState::new(config).await?;

    tracing::info!("Starting API server on {}", addr);
    api::serve(addr, state).await?;

    Ok(())
}
