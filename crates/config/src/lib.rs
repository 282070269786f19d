//! Configuration loading, validation, and management for Agentry.
//!
//! Loads configuration from `agentry.toml` with environment variable
//! overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `agentry.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Configuration store settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Outbound HTTP settings
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Permissive CORS for browser frontends (default: on)
    #[serde(default = "default_true")]
    pub cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path. `sqlite::memory:` gives an ephemeral store.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "agentry.db".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-call ceiling for external action invocations, in seconds.
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,

    /// Timeout for language-model calls, in seconds.
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,
}

fn default_action_timeout() -> u64 {
    30
}
fn default_llm_timeout() -> u64 {
    120
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: default_action_timeout(),
            llm_timeout_secs: default_llm_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `agentry.toml` in the working directory,
    /// then apply environment overrides:
    /// - `AGENTRY_HOST` / `AGENTRY_PORT`
    /// - `AGENTRY_DB_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(Path::new("agentry.toml"))?;

        if let Ok(host) = std::env::var("AGENTRY_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("AGENTRY_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("invalid AGENTRY_PORT: {port}")))?;
        }
        if let Ok(path) = std::env::var("AGENTRY_DB_PATH") {
            config.database.path = path;
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

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.http.action_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "action_timeout_secs must be > 0".into(),
            ));
        }
        if self.database.path.is_empty() {
            return Err(ConfigError::ValidationError(
                "database.path must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string (for `init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            http: HttpConfig::default(),
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.http.action_timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.database.path, config.database.path);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/agentry.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().server.host, "127.0.0.1");
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = AppConfig {
            http: HttpConfig {
                action_timeout_secs: 0,
                ..HttpConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: AppConfig = toml::from_str("[server]\nport = 9001\n").unwrap();
        assert_eq!(parsed.server.port, 9001);
        assert_eq!(parsed.server.host, "127.0.0.1");
        assert_eq!(parsed.database.path, "agentry.db");
    }
}
