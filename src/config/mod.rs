//! Configuration management for MeshClip
//!
//! Handles loading, validating, and saving the TOML configuration for the
//! MeshClip service.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Port the peer-facing HTTP service listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address to bind (the service is reachable over the tailnet
    /// interface as well when bound to 0.0.0.0)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Hostname announced to peers; defaults to the machine hostname
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Clipboard sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Peer discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// File storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Clipboard sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Whether the broadcast loop runs at all
    #[serde(default)]
    pub enabled: bool,

    /// Clipboard poll interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Static peer hostnames/IPs; non-empty list bypasses discovery
    #[serde(default)]
    pub peers: Vec<String>,

    /// Per-peer push timeout in milliseconds
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,
}

/// Peer discovery configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Tailscale admin API token; used when the CLI is unavailable.
    /// The TAILSCALE_API_TOKEN environment variable takes precedence.
    #[serde(default)]
    pub api_token: Option<String>,
}

/// File storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for received files
    #[serde(default = "default_file_dir")]
    pub file_dir: PathBuf,
}

// Default value functions
fn default_port() -> u16 {
    crate::DEFAULT_PORT
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_hostname() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_push_timeout_ms() -> u64 {
    10_000
}

fn default_file_dir() -> PathBuf {
    PathBuf::from("~/.local/share/meshclip/files")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_interval_ms(),
            peers: Vec::new(),
            push_timeout_ms: default_push_timeout_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file_dir: default_file_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_addr: default_bind_addr(),
            hostname: default_hostname(),
            sync: SyncConfig::default(),
            discovery: DiscoveryConfig::default(),
            storage: StorageConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Checks in order:
    /// 1. Path from MESHCLIP_CONFIG environment variable
    /// 2. ~/.config/meshclip/config.toml
    /// 3. Defaults if no file exists
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_path() {
            Some(path) => Self::load_from_path(&path),
            None => {
                let mut config = Self::default();
                config.expand_paths();
                Ok(config)
            }
        }
    }

    /// Load configuration with an optional explicit path
    pub fn load_config(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::load_from_path(&path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(toml_str)?;
        config.expand_paths();
        config.validate_config()?;
        Ok(config)
    }

    /// Effective discovery API token (env wins over config)
    pub fn api_token(&self) -> Option<String> {
        std::env::var("TAILSCALE_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.discovery.api_token.clone())
    }

    /// Find configuration file path
    fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("MESHCLIP_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        dirs::config_dir()
            .map(|p| p.join("meshclip").join("config.toml"))
            .filter(|p| p.exists())
    }

    /// Expand tilde in paths
    fn expand_paths(&mut self) {
        self.storage.file_dir = expand_path(&self.storage.file_dir);
    }

    /// Validate configuration values
    fn validate_config(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        if self.sync.interval_ms < 100 {
            return Err(ConfigError::Validation(
                "sync.interval_ms must be at least 100".to_string(),
            ));
        }
        if self.sync.interval_ms > 60_000 {
            return Err(ConfigError::Validation(
                "sync.interval_ms must not exceed 60000 (one minute)".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| {
                ConfigError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not find config directory",
                ))
            })?
            .join("meshclip");

        std::fs::create_dir_all(&config_dir)?;

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            ConfigError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        std::fs::write(config_dir.join("config.toml"), toml_string)?;
        Ok(())
    }

    /// Validate the configuration file at the given path
    pub fn validate(path: &Path) -> Result<(), ConfigError> {
        Self::load_from_path(path).map(|_| ())
    }

    /// Write an example configuration file
    pub fn generate_example_config(force: bool) -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| {
                ConfigError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not find config directory",
                ))
            })?
            .join("meshclip");

        std::fs::create_dir_all(&config_dir)?;
        let config_path = config_dir.join("config.toml");

        if !force && config_path.exists() {
            return Err(ConfigError::Validation(
                "Config file already exists. Use --force to overwrite.".to_string(),
            ));
        }

        std::fs::write(&config_path, Self::generate_example())?;
        Ok(config_path)
    }

    /// Example configuration with comments
    pub fn generate_example() -> String {
        let config = Config::default();
        format!(
            r#"# MeshClip Configuration File
# Location: ~/.config/meshclip/config.toml

# Port the peer-facing HTTP service listens on
port = {}
# Address to bind
bind_addr = "{}"
# Hostname announced to peers (defaults to the machine hostname)
hostname = "{}"
# Logging level (trace, debug, info, warn, error)
log_level = "{}"

[sync]
# Broadcast local clipboard changes to peers
enabled = {}
# Clipboard poll interval in milliseconds
interval_ms = {}
# Static peer hostnames or IPs; non-empty bypasses discovery
peers = []
# Per-peer push timeout in milliseconds
push_timeout_ms = {}

[discovery]
# Tailscale admin API token for device discovery when the CLI is
# unavailable (TAILSCALE_API_TOKEN env var takes precedence)
# api_token = "tskey-api-..."

[storage]
# Directory for received files
file_dir = "{}"
"#,
            config.port,
            config.bind_addr,
            config.hostname,
            config.log_level,
            config.sync.enabled,
            config.sync.interval_ms,
            config.sync.push_timeout_ms,
            default_file_dir().display(),
        )
    }
}

/// Expand tilde in path
fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(path_str.as_ref());
    PathBuf::from(expanded.into_owned())
}
