// Process configuration, read once at startup and immutable afterwards

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default access token lifetime (15 minutes)
pub const DEFAULT_ACCESS_EXPIRY: Duration = Duration::from_secs(15 * 60);

/// Default refresh token lifetime (7 days)
pub const DEFAULT_REFRESH_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default admin bind address
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid duration '{0}' (expected <n>ms, <n>s, <n>m, <n>h or <n>d)")]
    InvalidDuration(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// On-disk configuration file (TOML). Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub workspace: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub scripts_dir: Option<PathBuf>,
    pub ai_data_dir: Option<PathBuf>,
    pub features: Option<Vec<String>>,
    pub bind_address: Option<String>,
    pub dev_mode: Option<bool>,
    pub auth: AuthFileConfig,
    pub mcp: McpFileConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    pub access_expiry: Option<String>,
    pub refresh_expiry: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpFileConfig {
    pub max_concurrent_handlers: Option<usize>,
    pub shutdown_grace: Option<String>,
    pub max_message_bytes: Option<usize>,
}

/// Values supplied on the command line or through the environment.
/// These win over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub workspace: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub scripts_dir: Option<PathBuf>,
    pub ai_data_dir: Option<PathBuf>,
    /// Comma-separated feature flags
    pub features: Option<String>,
    pub bind_address: Option<String>,
    pub dev_mode: Option<bool>,
    pub access_expiry: Option<String>,
    pub refresh_expiry: Option<String>,
}

/// Tuning for the MCP protocol engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpSettings {
    /// Upper bound on concurrently executing tool handlers
    pub max_concurrent_handlers: usize,
    /// How long in-flight handlers may keep running after shutdown starts
    pub shutdown_grace: Duration,
    /// Longest accepted line on the input stream
    pub max_message_bytes: usize,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: 16,
            shutdown_grace: Duration::from_secs(5),
            max_message_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Resolved process configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub workspace_path: PathBuf,
    pub data_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub ai_data_dir: PathBuf,
    pub features: BTreeSet<String>,
    pub bind_address: SocketAddr,
    pub dev_mode: bool,
    pub access_expiry: Duration,
    pub refresh_expiry: Duration,
    pub mcp: McpSettings,
}

impl ServerConfig {
    /// Configuration rooted at `workspace` with every other value defaulted
    pub fn for_workspace(workspace: impl Into<PathBuf>) -> Self {
        let workspace_path = workspace.into();
        Self {
            data_dir: workspace_path.join("data"),
            scripts_dir: workspace_path.join("scripts"),
            ai_data_dir: workspace_path.join("ai-data"),
            workspace_path,
            features: BTreeSet::new(),
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            dev_mode: false,
            access_expiry: DEFAULT_ACCESS_EXPIRY,
            refresh_expiry: DEFAULT_REFRESH_EXPIRY,
            mcp: McpSettings::default(),
        }
    }

    /// Load the optional TOML file, apply overrides and validate
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let file = match config_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            Some(path) => {
                tracing::info!("Configuration file {} not found, using defaults", path.display());
                FileConfig::default()
            }
            None => FileConfig::default(),
        };

        Self::resolve(file, overrides)
    }

    /// Merge file values and overrides into a validated configuration
    pub fn resolve(file: FileConfig, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let workspace_path = overrides
            .workspace
            .or(file.workspace)
            .ok_or_else(|| ConfigError::Invalid("workspace path is required".to_string()))?;

        let mut config = Self::for_workspace(workspace_path);

        if let Some(dir) = overrides.data_dir.or(file.data_dir) {
            config.data_dir = config.under_workspace(dir);
        }
        if let Some(dir) = overrides.scripts_dir.or(file.scripts_dir) {
            config.scripts_dir = config.under_workspace(dir);
        }
        if let Some(dir) = overrides.ai_data_dir.or(file.ai_data_dir) {
            config.ai_data_dir = config.under_workspace(dir);
        }

        config.features = match (overrides.features, file.features) {
            (Some(raw), _) => parse_features(&raw),
            (None, Some(list)) => list.iter().flat_map(|f| parse_features(f)).collect(),
            (None, None) => BTreeSet::new(),
        };

        if let Some(addr) = overrides.bind_address.or(file.bind_address) {
            config.bind_address = addr
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("bind address '{}' is not host:port", addr)))?;
        }

        config.dev_mode = overrides.dev_mode.or(file.dev_mode).unwrap_or(false);

        if let Some(raw) = overrides.access_expiry.or(file.auth.access_expiry) {
            config.access_expiry = parse_duration(&raw)?;
        }
        if let Some(raw) = overrides.refresh_expiry.or(file.auth.refresh_expiry) {
            config.refresh_expiry = parse_duration(&raw)?;
        }

        if let Some(limit) = file.mcp.max_concurrent_handlers {
            config.mcp.max_concurrent_handlers = limit;
        }
        if let Some(raw) = file.mcp.shutdown_grace {
            config.mcp.shutdown_grace = parse_duration(&raw)?;
        }
        if let Some(max) = file.mcp.max_message_bytes {
            config.mcp.max_message_bytes = max;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("workspace path is empty".to_string()));
        }
        // Token claims carry whole seconds
        for (name, expiry) in [("access", self.access_expiry), ("refresh", self.refresh_expiry)] {
            if expiry.as_secs() == 0 || expiry.subsec_nanos() != 0 {
                return Err(ConfigError::Invalid(format!(
                    "{} expiry must be a positive whole number of seconds",
                    name
                )));
            }
        }
        if self.access_expiry >= self.refresh_expiry {
            return Err(ConfigError::Invalid(format!(
                "access expiry ({}s) must be shorter than refresh expiry ({}s)",
                self.access_expiry.as_secs(),
                self.refresh_expiry.as_secs()
            )));
        }
        for feature in &self.features {
            if !is_valid_feature(feature) {
                return Err(ConfigError::Invalid(format!("invalid feature flag '{}'", feature)));
            }
        }
        if self.mcp.max_concurrent_handlers == 0 {
            return Err(ConfigError::Invalid(
                "mcp.max_concurrent_handlers must be at least 1".to_string(),
            ));
        }
        if self.mcp.max_message_bytes == 0 {
            return Err(ConfigError::Invalid("mcp.max_message_bytes must be positive".to_string()));
        }
        Ok(())
    }

    /// Render a path relative to the workspace for display. Paths outside
    /// the workspace are reported by file name only.
    pub fn display_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.workspace_path) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => path
                .file_name()
                .map(|n| format!("<external>/{}", n.to_string_lossy()))
                .unwrap_or_else(|| "<external>".to_string()),
        }
    }

    fn under_workspace(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.workspace_path.join(path)
        }
    }
}

/// Parse a comma-separated feature list. Names are trimmed and lowercased.
pub fn parse_features(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|f| f.trim().to_ascii_lowercase())
        .filter(|f| !f.is_empty())
        .collect()
}

fn is_valid_feature(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Parse durations like `90s`, `15m`, `12h`, `7d` or `250ms`. A bare number
/// is read as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let trimmed = raw.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(raw.to_string()))?;

    let duration = match unit.trim() {
        "ms" => Duration::from_millis(value),
        "" | "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(3600)),
        "d" => Duration::from_secs(value.saturating_mul(86_400)),
        _ => return Err(ConfigError::InvalidDuration(raw.to_string())),
    };

    Ok(duration)
}
