//! Configuration management for fetchtask
//!
//! Settings are layered from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use fetchtask::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Any key can be overridden with `FETCHTASK__<section>__<key>`:
//! - `FETCHTASK__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `FETCHTASK__STORAGE__PROVIDER=s3`
//! - `FETCHTASK__CRON__RECOVERY_SWEEP__INTERVAL=10m`
//!
//! S3 credentials are read from `S3_ACCESS_KEY`/`S3_SECRET_KEY` (or the AWS
//! names) only.
//!
//! # Configuration File
//!
//! Loaded from `config/fetchtask.toml` unless `FETCHTASK_CONFIG` points
//! elsewhere.

mod models;
mod sources;
mod validation;

pub use crate::humanize::{ByteSize, HumanDuration};
pub use models::{
    Config, CronConfig, DispatchPendingConfig, DownloadConfig, LogFormat, MqConfig,
    RecoverySweepConfig, ServerConfig, StorageConfig, StorageProvider, TelemetryConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a value
    /// fails validation (zero intervals, missing S3 credentials, ...).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_path(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[storage]\nprovider = \"memory\"\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.storage.provider, StorageProvider::Memory);
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[cron.dispatch_pending]
concurrency_limit = 0
        "#;
        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result,
            Err(ConfigError::ValidationError(ValidationError::ZeroConcurrency))
        ));
    }

    #[test]
    fn test_s3_without_credentials_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[storage]
provider = "s3"
bucket = "downloads"
region = "us-east-1"
        "#;
        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result,
            Err(ConfigError::ValidationError(ValidationError::MissingS3Credentials))
        ));
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = Config::default();
        let rendered = toml::to_string(&config).unwrap();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rendered.toml");
        fs::write(&config_path, rendered).unwrap();

        let loaded = Config::load_from_path(config_path).unwrap();
        assert_eq!(loaded.server.bind_addr, config.server.bind_addr);
        assert_eq!(
            loaded.cron.recovery_sweep.interval,
            config.cron.recovery_sweep.interval
        );
    }
}
