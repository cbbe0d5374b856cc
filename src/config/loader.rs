//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of environment variables that append interceptor rules.
pub const INTERCEPTOR_ENV_PREFIX: &str = "INTERCEPTOR_";

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
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, then append
/// `INTERCEPTOR_*` rules from the environment.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: GatewayConfig = toml::from_str(&content)?;
    finish(config, std::env::vars())
}

/// Like [`load_config`], falling back to defaults when the file does not exist.
pub fn load_config_or_default(path: &Path) -> Result<GatewayConfig, ConfigError> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        finish(GatewayConfig::default(), std::env::vars())
    }
}

fn finish(
    mut config: GatewayConfig,
    env: impl Iterator<Item = (String, String)>,
) -> Result<GatewayConfig, ConfigError> {
    config.interceptors.extend(interceptors_from_env(env));
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Interceptor rules from `INTERCEPTOR_<N>` variables, sorted by key.
pub fn interceptors_from_env(env: impl Iterator<Item = (String, String)>) -> Vec<String> {
    let mut rules: Vec<(String, String)> = env
        .filter(|(key, value)| key.starts_with(INTERCEPTOR_ENV_PREFIX) && !value.trim().is_empty())
        .collect();
    rules.sort_by(|a, b| a.0.cmp(&b.0));
    rules.into_iter().map(|(_, value)| value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_rules_are_sorted_by_key() {
        let env = vec![
            ("INTERCEPTOR_2".to_string(), "2;*;b;request".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("INTERCEPTOR_1".to_string(), "1;*;a;request".to_string()),
            ("INTERCEPTOR_3".to_string(), " ".to_string()),
        ];

        let rules = interceptors_from_env(env.into_iter());
        assert_eq!(rules, vec!["1;*;a;request", "2;*;b;request"]);
    }

    #[test]
    fn env_rules_are_validated() {
        let env = vec![("INTERCEPTOR_1".to_string(), "oops".to_string())];
        let result = finish(GatewayConfig::default(), env.into_iter());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = load_config(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
