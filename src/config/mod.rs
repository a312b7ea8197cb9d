pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::error::StreamError;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

impl From<ConfigError> for StreamError {
    fn from(err: ConfigError) -> Self {
        StreamError::Config(err.to_string())
    }
}

/// Knobs shared by every provider stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Upper bound for one buffered SSE event; larger events fail the stream.
    #[serde(default = "default_max_event_bytes")]
    pub max_event_bytes: usize,
    /// How much trailing body is read and discarded once decoding stops, so
    /// the connection can go back to the pool.
    #[serde(default = "default_drain_max_bytes")]
    pub drain_max_bytes: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_max_event_bytes() -> usize {
    8 * 1024 * 1024
}
fn default_drain_max_bytes() -> usize {
    1024 * 1024
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_event_bytes: default_max_event_bytes(),
            drain_max_bytes: default_drain_max_bytes(),
            log_level: default_log_level(),
        }
    }
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<StreamConfig, ConfigError> {
    let config: StreamConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<StreamConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}
