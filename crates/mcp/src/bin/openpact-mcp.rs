// Standalone MCP server binary, speaking JSON-RPC on stdin/stdout

use anyhow::{Context, Result};
use clap::Parser;
use openpact_core::{ConfigOverrides, ServerConfig};
use openpact_mcp::{builtin_catalog, McpServer, Sanitizer, ServeOutcome, ShutdownHandle, ToolRegistry};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "openpact-mcp")]
#[command(about = "OpenPact MCP tool server (stdio)", long_about = None)]
struct Args {
    /// Optional TOML configuration file
    #[arg(long, env = "OPENPACT_CONFIG")]
    config: Option<PathBuf>,

    /// Workspace root directory
    #[arg(long, env = "OPENPACT_WORKSPACE")]
    workspace: Option<PathBuf>,

    #[arg(long, env = "OPENPACT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, env = "OPENPACT_SCRIPTS_DIR")]
    scripts_dir: Option<PathBuf>,

    #[arg(long, env = "OPENPACT_AI_DATA_DIR")]
    ai_data_dir: Option<PathBuf>,

    /// Comma-separated feature flags enabling optional tools
    #[arg(long, env = "OPENPACT_FEATURES")]
    features: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            workspace: self.workspace.clone(),
            data_dir: self.data_dir.clone(),
            scripts_dir: self.scripts_dir.clone(),
            ai_data_dir: self.ai_data_dir.clone(),
            features: self.features.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(Args::parse()).await {
        Ok(outcome) => {
            tracing::info!("Exiting: {:?}", outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ServeOutcome> {
    let mut overrides = args.overrides();
    if overrides.workspace.is_none() && args.config.is_none() {
        overrides.workspace = Some(std::env::current_dir().context("Failed to resolve working directory")?);
    }
    let config = ServerConfig::load(args.config.as_deref(), overrides).context("Invalid configuration")?;

    tracing::info!(
        workspace = %config.workspace_path.display(),
        features = ?config.features,
        "OpenPact MCP server starting"
    );

    let registry = ToolRegistry::build(&config, builtin_catalog()).context("Failed to build tool registry")?;
    let sanitizer = Sanitizer::from_config(&config).with_env_secrets();
    let server = McpServer::new(registry, sanitizer).with_settings(config.mcp.clone());

    let shutdown = ShutdownHandle::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.shutdown();
        }
    });

    let outcome = server.serve_stdio(shutdown).await?;
    Ok(outcome)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
