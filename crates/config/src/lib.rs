//! Configuration loading, validation, and management for Parlor.
//!
//! Loads configuration from `~/.parlor/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.parlor/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion-service API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Which completion provider to construct: "stub" or any
    /// OpenAI-compatible provider name ("openai", "openrouter", ...)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL of the completion service (defaults per provider name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model identifier sent with every completion request
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens the model may generate per chat reply
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,

    /// Max tokens the model may generate for a topic label
    #[serde(default = "default_max_topic_tokens")]
    pub max_topic_tokens: u32,

    /// Context window construction settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Turn store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_provider() -> String {
    "stub".into()
}
fn default_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_completion_tokens() -> u32 {
    1024
}
fn default_max_topic_tokens() -> u32 {
    64
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_completion_tokens", &self.max_completion_tokens)
            .field("max_topic_tokens", &self.max_topic_tokens)
            .field("context", &self.context)
            .field("store", &self.store)
            .field("gateway", &self.gateway)
            .finish()
    }
}

/// Settings for the history window builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Total token budget of the model's context window
    #[serde(default = "default_window_tokens")]
    pub window_tokens: usize,

    /// Headroom reserved for the model's own generated output
    #[serde(default = "default_reserved_output_tokens")]
    pub reserved_output_tokens: usize,

    /// How many recent persisted turns are candidates for inclusion
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: u32,

    /// Fixed system instruction prepended to every window.
    /// Set to an empty string to disable.
    #[serde(default = "default_system_preamble")]
    pub system_preamble: String,
}

fn default_window_tokens() -> usize {
    4000
}
fn default_reserved_output_tokens() -> usize {
    1024
}
fn default_max_history_turns() -> u32 {
    4
}
fn default_system_preamble() -> String {
    "Format your replies as Markdown.".into()
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_tokens: default_window_tokens(),
            reserved_output_tokens: default_reserved_output_tokens(),
            max_history_turns: default_max_history_turns(),
            system_preamble: default_system_preamble(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite connection string. `sqlite::memory:` gives an ephemeral
    /// in-process database.
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_database_url() -> String {
    format!(
        "sqlite://{}?mode=rwc",
        AppConfig::config_dir().join("parlor.db").display()
    )
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { database_url: default_database_url() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Require the pairing code on POST /pair before a bearer token is
    /// issued. Disable only for local development.
    #[serde(default = "default_true")]
    pub require_pairing: bool,
}

fn default_port() -> u16 {
    42810
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_true() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { port: default_port(), host: default_host(), require_pairing: true }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.parlor/config.toml).
    ///
    /// Also checks environment variables for secrets and overrides:
    /// - `PARLOR_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `PARLOR_PROVIDER`, `PARLOR_MODEL`, `PARLOR_DATABASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("PARLOR_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("PARLOR_PROVIDER") {
            config.provider = provider;
        }

        if let Ok(model) = std::env::var("PARLOR_MODEL") {
            config.model = model;
        }

        if let Ok(url) = std::env::var("PARLOR_DATABASE_URL") {
            config.store.database_url = url;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parlor")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.context.reserved_output_tokens >= self.context.window_tokens {
            return Err(ConfigError::ValidationError(
                "reserved_output_tokens must be smaller than window_tokens".into(),
            ));
        }

        if self.context.max_history_turns == 0 {
            return Err(ConfigError::ValidationError(
                "max_history_turns must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            api_url: None,
            model: default_model(),
            temperature: default_temperature(),
            max_completion_tokens: default_max_completion_tokens(),
            max_topic_tokens: default_max_topic_tokens(),
            context: ContextConfig::default(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
