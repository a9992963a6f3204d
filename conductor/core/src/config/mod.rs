//! TOML Configuration File Support
//!
//! This module provides centralized configuration loading for the Conductor,
//! supporting a TOML configuration file at `~/.config/chat-conductor/conductor.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/chat-conductor/conductor.toml` for configuration
//! - `$XDG_DATA_HOME/chat-conductor/chat-storage.json` for saved conversations
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! api_base_url = "https://learn.example.edu/api/v1"
//! auth_token = "eyJhbGciOi..."
//! request_timeout_secs = 120
//!
//! [chat]
//! mode = "tutor"
//! retrieval_augmented = true
//!
//! [storage]
//! path = "/home/me/.local/share/chat-conductor/chat-storage.json"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persistence::JsonFilePersistence;
use crate::store::DEFAULT_MODE;

/// Default API base URL
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";

/// Default request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

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

/// Tracks where a configuration value came from
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

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// API base URL (the chat endpoint is `{api_base_url}/ai/chat`)
    pub api_base_url: Option<String>,

    /// Bearer token for the AI service
    pub auth_token: Option<String>,

    /// Request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Chat section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatToml {
    /// Base chat mode
    pub mode: Option<String>,

    /// Whether retrieval augmentation starts enabled
    pub retrieval_augmented: Option<bool>,
}

/// Storage section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageToml {
    /// Path of the chat snapshot file
    pub path: Option<PathBuf>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorToml {
    /// Backend configuration section
    pub backend: BackendToml,

    /// Chat configuration section
    pub chat: ChatToml,

    /// Storage configuration section
    pub storage: StorageToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the Conductor
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct ConductorConfig {
    /// API base URL
    pub api_base_url: String,

    /// Bearer token for the AI service
    pub auth_token: Option<String>,

    /// HTTP request timeout
    pub request_timeout: Duration,

    /// Base chat mode for new sessions
    pub default_mode: String,

    /// Whether retrieval augmentation starts enabled
    pub retrieval_augmented: bool,

    /// Chat snapshot file (`None` keeps conversations in memory only)
    pub storage_path: Option<PathBuf>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            auth_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_mode: DEFAULT_MODE.to_string(),
            retrieval_augmented: false,
            storage_path: JsonFilePersistence::default_path(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ConductorConfig {
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

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check the values that can make the Conductor unusable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a base URL that is not
    /// `http(s)://` or a zero request timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api_base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "api_base_url must start with http:// or https://, got '{url}'"
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chat-conductor/conductor.toml` or
/// `~/.config/chat-conductor/conductor.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chat-conductor").join("conductor.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ConductorConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ConductorConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading environment variables through `env`
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ConductorConfig, ConfigError> {
    // Start with defaults
    let mut config = ConductorConfig::default();

    // Try to load from file
    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ConductorToml = toml::from_str(&toml_content)?;
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

    // Apply environment variables (overrides file values)
    apply_env_config(&mut config, env);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ConductorConfig, toml: &ConductorToml) {
    // Backend settings
    if let Some(ref url) = toml.backend.api_base_url {
        config.api_base_url.clone_from(url);
    }
    if toml.backend.auth_token.is_some() {
        config.auth_token.clone_from(&toml.backend.auth_token);
    }
    if let Some(secs) = toml.backend.request_timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }

    // Chat settings
    if let Some(ref mode) = toml.chat.mode {
        config.default_mode.clone_from(mode);
    }
    if let Some(enabled) = toml.chat.retrieval_augmented {
        config.retrieval_augmented = enabled;
    }

    // Storage settings
    if toml.storage.path.is_some() {
        config.storage_path.clone_from(&toml.storage.path);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ConductorConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(url) = env("CHAT_CONDUCTOR_API_URL") {
        config.api_base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(token) = env("CHAT_CONDUCTOR_TOKEN") {
        config.auth_token = Some(token).filter(|t| !t.is_empty());
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = env("CHAT_CONDUCTOR_TIMEOUT_SECS") {
        if let Ok(secs) = timeout.parse::<u64>() {
            config.request_timeout = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(mode) = env("CHAT_CONDUCTOR_MODE") {
        config.default_mode = mode;
        config.source = ConfigSource::Env;
    }
    if let Some(enabled) = env("CHAT_CONDUCTOR_RAG") {
        config.retrieval_augmented = enabled != "0" && enabled.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
    if let Some(path) = env("CHAT_CONDUCTOR_STORAGE") {
        config.storage_path = Some(PathBuf::from(path));
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
    /// API base URL override
    pub api_base_url: Option<String>,

    /// Auth token override
    pub auth_token: Option<String>,

    /// Mode override
    pub mode: Option<String>,

    /// Retrieval augmentation override
    pub retrieval_augmented: Option<bool>,

    /// Storage path override
    pub storage_path: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set API base URL override
    #[must_use]
    pub fn with_api_base_url(mut self, url: String) -> Self {
        self.api_base_url = Some(url);
        self
    }

    /// Set auth token override
    #[must_use]
    pub fn with_auth_token(mut self, token: String) -> Self {
        self.auth_token = Some(token);
        self
    }

    /// Set mode override
    #[must_use]
    pub fn with_mode(mut self, mode: String) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set retrieval augmentation override
    #[must_use]
    pub fn with_retrieval_augmented(mut self, enabled: bool) -> Self {
        self.retrieval_augmented = Some(enabled);
        self
    }

    /// Set storage path override
    #[must_use]
    pub fn with_storage_path(mut self, path: PathBuf) -> Self {
        self.storage_path = Some(path);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ConductorConfig) {
        if self.api_base_url.is_some()
            || self.auth_token.is_some()
            || self.mode.is_some()
            || self.retrieval_augmented.is_some()
            || self.storage_path.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.api_base_url {
            config.api_base_url.clone_from(url);
        }
        if self.auth_token.is_some() {
            config.auth_token.clone_from(&self.auth_token);
        }
        if let Some(ref mode) = self.mode {
            config.default_mode.clone_from(mode);
        }
        if let Some(enabled) = self.retrieval_augmented {
            config.retrieval_augmented = enabled;
        }
        if self.storage_path.is_some() {
            config.storage_path.clone_from(&self.storage_path);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
