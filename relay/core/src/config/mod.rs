//! TOML Configuration File Support
//!
//! Centralized configuration loading for the relay, from a TOML file at
//! `~/.config/ollama-relay/relay.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:9201"
//! max_connections = 256
//! outbound_capacity = 64
//! max_message_size = 65536
//!
//! [backend]
//! host = "localhost"
//! port = 11434
//! model = "phi4-mini:latest"
//! temperature = 0.7
//! connect_timeout_secs = 10
//! request_timeout_secs = 120
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendSettings;

/// Default listen address
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9201";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Where the highest-priority configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen address
    pub bind_addr: Option<String>,

    /// Maximum simultaneous client connections
    pub max_connections: Option<usize>,

    /// Per-connection outbound message queue capacity
    pub outbound_capacity: Option<usize>,

    /// Maximum inbound message size in bytes
    pub max_message_size: Option<usize>,
}

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Ollama host
    pub host: Option<String>,

    /// Ollama port
    pub port: Option<u16>,

    /// Model identifier
    pub model: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f64>,

    /// TCP connect timeout in seconds
    pub connect_timeout_secs: Option<u64>,

    /// Timeout for non-streaming requests in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Server configuration section
    pub server: ServerToml,

    /// Backend configuration section
    pub backend: BackendToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Listener and connection limits
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSettings {
    /// Listen address, as given
    pub bind_addr: String,
    /// Maximum simultaneous client connections
    pub max_connections: usize,
    /// Per-connection outbound message queue capacity
    pub outbound_capacity: usize,
    /// Maximum inbound message size in bytes
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_connections: 256,
            outbound_capacity: 64,
            max_message_size: 65536,
        }
    }
}

impl ServerSettings {
    /// Parse the listen address
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the address does not parse.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr.parse().map_err(|e| {
            ConfigError::ValidationError(format!("invalid bind address {:?}: {e}", self.bind_addr))
        })
    }
}

/// Complete relay configuration
///
/// Use [`load_config`] to load it with proper priority handling.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Listener settings
    pub server: ServerSettings,

    /// Backend settings
    pub backend: BackendSettings,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            backend: BackendSettings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first invalid
    /// value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;

        if self.server.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.server.outbound_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "outbound_capacity must be at least 1".into(),
            ));
        }
        if self.server.max_message_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_message_size must be at least 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.backend.temperature
            )));
        }
        if self.backend.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }
        if self.backend.host.trim().is_empty() {
            return Err(ConfigError::ValidationError("backend host must not be empty".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/ollama-relay/relay.toml` or
/// `~/.config/ollama-relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ollama-relay").join("relay.toml"))
}

/// Load configuration from the default file and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or a
/// value is out of range. A missing config file is not an error.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or a value is out of range.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with a custom environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = RelayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RelayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) {
    // Server settings
    if let Some(ref addr) = toml.server.bind_addr {
        config.server.bind_addr.clone_from(addr);
    }
    if let Some(max) = toml.server.max_connections {
        config.server.max_connections = max;
    }
    if let Some(capacity) = toml.server.outbound_capacity {
        config.server.outbound_capacity = capacity;
    }
    if let Some(size) = toml.server.max_message_size {
        config.server.max_message_size = size;
    }

    // Backend settings
    if let Some(ref host) = toml.backend.host {
        config.backend.host.clone_from(host);
    }
    if let Some(port) = toml.backend.port {
        config.backend.port = port;
    }
    if let Some(ref model) = toml.backend.model {
        config.backend.model.clone_from(model);
    }
    if let Some(temperature) = toml.backend.temperature {
        config.backend.temperature = temperature;
    }
    if let Some(secs) = toml.backend.connect_timeout_secs {
        config.backend.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.backend.request_timeout_secs {
        config.backend.request_timeout = Duration::from_secs(secs);
    }
}

/// Apply environment variable overrides to the config
///
/// Values that fail to parse are ignored with a warning.
fn apply_env_config<F>(config: &mut RelayConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
        let parsed = value.trim().parse().ok();
        if parsed.is_none() {
            tracing::warn!(key, value, "Ignoring unparsable environment override");
        }
        parsed
    }

    if let Some(addr) = env("RELAY_BIND") {
        config.server.bind_addr = addr;
        config.source = ConfigSource::Env;
    }
    if let Some(max) = env("RELAY_MAX_CONNECTIONS").and_then(|v| parsed("RELAY_MAX_CONNECTIONS", &v)) {
        config.server.max_connections = max;
        config.source = ConfigSource::Env;
    }

    if let Some(host) = env("OLLAMA_HOST") {
        config.backend.host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env("OLLAMA_PORT").and_then(|v| parsed("OLLAMA_PORT", &v)) {
        config.backend.port = port;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("RELAY_MODEL") {
        config.backend.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(temperature) = env("RELAY_TEMPERATURE").and_then(|v| parsed("RELAY_TEMPERATURE", &v)) {
        config.backend.temperature = temperature;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listen address override
    pub bind_addr: Option<String>,
    /// Model override
    pub model: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address override
    #[must_use]
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = Some(addr.into());
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Apply overrides to a configuration and re-validate it
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override is invalid.
    pub fn apply(&self, config: &mut RelayConfig) -> Result<(), ConfigError> {
        if self.bind_addr.is_some() || self.model.is_some() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref addr) = self.bind_addr {
            config.server.bind_addr.clone_from(addr);
        }
        if let Some(ref model) = self.model {
            config.backend.model.clone_from(model);
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
