use crate::humanize::{ByteSize, HumanDuration};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub mq: MqConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Directory of the fjall task store
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    /// How long a row-lock waiter blocks before giving up
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: HumanDuration,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_path: default_data_path(),
            lock_timeout: default_lock_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data/tasks")
}

fn default_lock_timeout() -> HumanDuration {
    HumanDuration::from_secs(5)
}

fn default_max_body_bytes() -> ByteSize {
    ByteSize(64 * 1024)
}

/// Storage provider type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Memory,
    #[default]
    Local,
    S3,
}

/// Blob storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    /// Root directory for the local provider
    #[serde(default = "default_download_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// S3 access key (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            directory: default_download_directory(),
            bucket: default_bucket(),
            endpoint: None,
            region: None,
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_download_directory() -> PathBuf {
    PathBuf::from("data/downloads")
}

fn default_bucket() -> String {
    "fetchtask-downloads".to_string()
}

/// Settings for the built-in downloaders
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: HumanDuration,
    /// Whole-request deadline, including the body stream
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Payloads larger than this fail the task
    #[serde(default)]
    pub max_file_bytes: Option<ByteSize>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            max_file_bytes: None,
        }
    }
}

fn default_connect_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration::from_secs(300)
}

fn default_user_agent() -> String {
    format!("fetchtask/{}", env!("CARGO_PKG_VERSION"))
}

/// Periodic jobs
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CronConfig {
    #[serde(default)]
    pub recovery_sweep: RecoverySweepConfig,
    #[serde(default)]
    pub dispatch_pending: DispatchPendingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecoverySweepConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval: HumanDuration,
    /// Only requeue DOWNLOADING tasks claimed at least this long ago.
    /// Unset means every DOWNLOADING task is requeued.
    #[serde(default)]
    pub stale_after: Option<HumanDuration>,
}

impl Default for RecoverySweepConfig {
    fn default() -> Self {
        Self {
            interval: default_sweep_interval(),
            stale_after: None,
        }
    }
}

fn default_sweep_interval() -> HumanDuration {
    HumanDuration::from_secs(5 * 60)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchPendingConfig {
    #[serde(default = "default_dispatch_interval")]
    pub interval: HumanDuration,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

impl Default for DispatchPendingConfig {
    fn default() -> Self {
        Self {
            interval: default_dispatch_interval(),
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

fn default_dispatch_interval() -> HumanDuration {
    HumanDuration::from_secs(60)
}

fn default_concurrency_limit() -> usize {
    8
}

/// Event channel delivery settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqConfig {
    /// Delivery attempts per message and handler, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_redelivery_backoff")]
    pub redelivery_backoff: HumanDuration,
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            redelivery_backoff: default_redelivery_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_redelivery_backoff() -> HumanDuration {
    HumanDuration::from_secs(1)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Telemetry configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub log_format: LogFormat,
}
