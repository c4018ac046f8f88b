//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::LbConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<LbConfig, ConfigError> {
    let config: LbConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<LbConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_is_reported() {
        let err = parse_config("[pool\nendpoints = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_errors_are_joined() {
        let err = parse_config(
            r#"
            [pool]
            endpoints = ["bad", "also-bad"]
            "#,
        )
        .unwrap_err();
        match &err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().contains("\"bad\", pool.endpoints"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/lb-pool.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!("lb-pool-loader-{}.toml", std::process::id()));
        fs::write(&path, "[pool]\nendpoints = [\"127.0.0.1:9000\"]\nkeep_alive = true\n").unwrap();
        let config = load_config(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(config.pool.endpoints, vec!["127.0.0.1:9000".to_string()]);
        assert!(config.pool.keep_alive);
    }
}
