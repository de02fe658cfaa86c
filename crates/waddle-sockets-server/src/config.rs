//! Host configuration loaded from a TOML file with environment overrides.
//!
//! Every field has a default, so an absent file yields a runnable server.
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [connections]
//! scan_interval_ms = 1000
//! inactivity_timeout_ms = 5000
//! shutdown_timeout_ms = 5000
//! max_concurrent_disposals = 64
//! ```
//!
//! # Environment Variables
//!
//! - `WADDLE_LOG_LEVEL`: overrides `logging.level`
//! - `WADDLE_SOCKETS_SCAN_INTERVAL_MS`, `WADDLE_SOCKETS_INACTIVITY_TIMEOUT_MS`,
//!   `WADDLE_SOCKETS_SHUTDOWN_TIMEOUT_MS`, `WADDLE_SOCKETS_MAX_CONCURRENT_DISPOSALS`:
//!   override the matching `connections` field

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use waddle_sockets::config::{
    DEFAULT_INACTIVITY_TIMEOUT_MS, DEFAULT_MAX_CONCURRENT_DISPOSALS, DEFAULT_SCAN_INTERVAL_MS,
    DEFAULT_SHUTDOWN_TIMEOUT_MS,
};
use waddle_sockets::ConnectionManagerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub connections: ConnectionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionsConfig {
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_disposals")]
    pub max_concurrent_disposals: usize,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            inactivity_timeout_ms: DEFAULT_INACTIVITY_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            max_concurrent_disposals: DEFAULT_MAX_CONCURRENT_DISPOSALS,
        }
    }
}

impl ConnectionsConfig {
    /// Convert to the connection manager's policy.
    pub fn to_manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig {
            scan_interval: Duration::from_millis(self.scan_interval_ms),
            inactivity_timeout: Duration::from_millis(self.inactivity_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            max_concurrent_disposals: self.max_concurrent_disposals,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ConfigOverrides {
    log_level: Option<String>,
    scan_interval_ms: Option<String>,
    inactivity_timeout_ms: Option<String>,
    shutdown_timeout_ms: Option<String>,
    max_concurrent_disposals: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_scan_interval_ms() -> u64 {
    DEFAULT_SCAN_INTERVAL_MS
}

fn default_inactivity_timeout_ms() -> u64 {
    DEFAULT_INACTIVITY_TIMEOUT_MS
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

fn default_max_concurrent_disposals() -> usize {
    DEFAULT_MAX_CONCURRENT_DISPOSALS
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Load configuration, merging environment variable overrides.
///
/// With no path the defaults are used. An explicit path must exist.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    load_config_with_overrides(path, config_overrides_from_env())
}

/// Parse configuration from a TOML string directly (for testing).
pub fn load_config_from_str(toml_str: &str) -> Result<ServerConfig, ConfigError> {
    load_config_from_str_with_overrides(toml_str, ConfigOverrides::default())
}

fn load_config_with_overrides(
    path: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<ServerConfig, ConfigError> {
    let Some(path) = path else {
        return load_config_from_str_with_overrides("", overrides);
    };

    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    load_config_from_str_with_overrides(&contents, overrides)
}

fn load_config_from_str_with_overrides(
    toml_str: &str,
    overrides: ConfigOverrides,
) -> Result<ServerConfig, ConfigError> {
    let mut config: ServerConfig = toml::from_str(toml_str).map_err(|e| {
        let (line, column) = e.span().map_or((0, 0), |span| {
            let before = &toml_str[..span.start];
            let line = before.chars().filter(|&c| c == '\n').count() + 1;
            let column = before
                .rfind('\n')
                .map_or(span.start + 1, |nl| span.start - nl);
            (line, column)
        });
        ConfigError::InvalidToml {
            line,
            column,
            message: e.message().to_string(),
        }
    })?;

    apply_overrides(&mut config, overrides)?;
    validate(&config)?;

    Ok(config)
}

fn config_overrides_from_env() -> ConfigOverrides {
    ConfigOverrides {
        log_level: std::env::var("WADDLE_LOG_LEVEL").ok(),
        scan_interval_ms: std::env::var("WADDLE_SOCKETS_SCAN_INTERVAL_MS").ok(),
        inactivity_timeout_ms: std::env::var("WADDLE_SOCKETS_INACTIVITY_TIMEOUT_MS").ok(),
        shutdown_timeout_ms: std::env::var("WADDLE_SOCKETS_SHUTDOWN_TIMEOUT_MS").ok(),
        max_concurrent_disposals: std::env::var("WADDLE_SOCKETS_MAX_CONCURRENT_DISPOSALS").ok(),
    }
}

fn parse_override<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("'{}' is not a valid number", value),
    })
}

fn apply_overrides(config: &mut ServerConfig, overrides: ConfigOverrides) -> Result<(), ConfigError> {
    if let Some(level) = overrides.log_level {
        config.logging.level = level;
    }
    if let Some(v) = overrides.scan_interval_ms {
        config.connections.scan_interval_ms = parse_override("connections.scan_interval_ms", &v)?;
    }
    if let Some(v) = overrides.inactivity_timeout_ms {
        config.connections.inactivity_timeout_ms =
            parse_override("connections.inactivity_timeout_ms", &v)?;
    }
    if let Some(v) = overrides.shutdown_timeout_ms {
        config.connections.shutdown_timeout_ms =
            parse_override("connections.shutdown_timeout_ms", &v)?;
    }
    if let Some(v) = overrides.max_concurrent_disposals {
        config.connections.max_concurrent_disposals =
            parse_override("connections.max_concurrent_disposals", &v)?;
    }
    Ok(())
}

/// Check a loaded configuration.
pub fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            message: format!(
                "'{}' is not one of {}",
                config.logging.level,
                VALID_LOG_LEVELS.join(", ")
            ),
        });
    }

    config
        .connections
        .to_manager_config()
        .validate()
        .map_err(|e| ConfigError::InvalidValue {
            field: "connections".to_string(),
            message: e.to_string(),
        })
}
