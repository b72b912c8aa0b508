//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Durable log file path override.
pub const ENV_LOG_FILE: &str = "APP_LOG_FILE";
/// Listener bind address override.
pub const ENV_BIND_ADDRESS: &str = "APP_BIND_ADDRESS";
/// Diagnostic log level override.
pub const ENV_LOG_LEVEL: &str = "APP_LOG_LEVEL";
/// OTLP traces endpoint override.
pub const ENV_OTLP_ENDPOINT: &str = "APP_OTLP_ENDPOINT";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load configuration from an optional TOML file, apply environment
/// overrides, and validate.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => ServiceConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply overrides using `lookup` to read variables. Empty values are ignored.
pub fn apply_env_overrides(config: &mut ServiceConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(path) = get(ENV_LOG_FILE) {
        config.logging.file_path = path;
    }
    if let Some(addr) = get(ENV_BIND_ADDRESS) {
        config.listener.bind_address = addr;
    }
    if let Some(level) = get(ENV_LOG_LEVEL) {
        config.logging.level = level;
    }
    if let Some(endpoint) = get(ENV_OTLP_ENDPOINT) {
        config.observability.otlp_endpoint = endpoint;
    }
}
