//! Configuration loading and validation.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::WeftConfig;

/// Configuration loading errors. These are the only startup-fatal errors
/// in the engine.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load and validate configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<WeftConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: WeftConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &WeftConfig) -> Result<(), ConfigError> {
    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    if config.bus.max_history == 0 {
        return Err(ConfigError::Invalid(
            "bus.max_history must be > 0".to_string(),
        ));
    }

    if config.scheduler.ingress_capacity == 0 {
        return Err(ConfigError::Invalid(
            "scheduler.ingress_capacity must be > 0".to_string(),
        ));
    }

    match config.stores.backend.as_str() {
        "memory" | "file" => {}
        other => {
            return Err(ConfigError::Invalid(format!(
                "stores.backend must be 'memory' or 'file', got '{}'",
                other
            )));
        }
    }

    if config.stores.backend == "file" && config.stores.path.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "stores.path must not be empty for the file backend".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_yields_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{}}").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.app.name, "weft");
        assert_eq!(config.bus.max_history, 1_000);
        assert_eq!(config.stores.backend, "memory");
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bus:\n  max_history: 50\nstores:\n  backend: file\n  path: /tmp/weft"
        )
        .unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.bus.max_history, 50);
        assert_eq!(config.stores.backend, "file");
        assert_eq!(config.scheduler.ingress_capacity, 64);
    }

    #[test]
    fn test_invalid_backend_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "stores:\n  backend: redis").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_ingress_capacity_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scheduler:\n  ingress_capacity: 0").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
