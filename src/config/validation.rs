use super::{ConfigError, StreamConfig};

/// Validate the stream config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &StreamConfig) -> Result<(), ConfigError> {
    validate_limits(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_limits(config: &StreamConfig) -> Result<(), ConfigError> {
    if config.max_event_bytes == 0 {
        return Err(validation_err("max_event_bytes must be greater than 0"));
    }
    if config.drain_max_bytes == 0 {
        return Err(validation_err("drain_max_bytes must be greater than 0"));
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &[
    "TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR", "CRITICAL", "DISABLED",
];

fn validate_log_level(config: &StreamConfig) -> Result<(), ConfigError> {
    let level = config.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {VALID_LOG_LEVELS:?}, got '{}'",
            config.log_level
        )));
    }
    Ok(())
}
