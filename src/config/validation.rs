use super::models::{Config, StorageProvider};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must be positive")]
    ZeroInterval { field: &'static str },

    #[error("cron.dispatch_pending.concurrency_limit must be at least 1")]
    ZeroConcurrency,

    #[error("mq.max_attempts must be at least 1")]
    ZeroDeliveryAttempts,

    #[error("Storage provider is S3 but missing credentials (access_key or secret_key)")]
    MissingS3Credentials,

    #[error("Storage provider is local but storage.directory is empty")]
    MissingStorageDirectory,

    #[error("Storage bucket must not be empty")]
    EmptyBucket,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_intervals(config)?;
    validate_dispatch(config)?;
    validate_storage(config)?;
    Ok(())
}

fn validate_intervals(config: &Config) -> Result<(), ValidationError> {
    let intervals = [
        ("server.lock_timeout", config.server.lock_timeout),
        ("cron.recovery_sweep.interval", config.cron.recovery_sweep.interval),
        ("cron.dispatch_pending.interval", config.cron.dispatch_pending.interval),
    ];

    for (field, value) in intervals {
        if value.0.is_zero() {
            return Err(ValidationError::ZeroInterval { field });
        }
    }

    Ok(())
}

fn validate_dispatch(config: &Config) -> Result<(), ValidationError> {
    if config.cron.dispatch_pending.concurrency_limit == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }
    if config.mq.max_attempts == 0 {
        return Err(ValidationError::ZeroDeliveryAttempts);
    }
    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    match config.storage.provider {
        StorageProvider::Memory => {}
        StorageProvider::Local => {
            if config.storage.directory.as_os_str().is_empty() {
                return Err(ValidationError::MissingStorageDirectory);
            }
        }
        StorageProvider::S3 => {
            if config.storage.bucket.is_empty() {
                return Err(ValidationError::EmptyBucket);
            }
            if config.storage.access_key.is_none() || config.storage.secret_key.is_none() {
                return Err(ValidationError::MissingS3Credentials);
            }
        }
    }

    Ok(())
}
