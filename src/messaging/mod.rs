//! Event channel abstraction
//!
//! Producers publish opaque payloads to named topics; consumers register a
//! [`MessageHandler`] per topic. Delivery is at-least-once, so handlers must
//! tolerate seeing the same message more than once.

pub mod bus;
pub mod events;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use bus::InMemoryBus;
pub use events::{DownloadTaskCreated, TOPIC_DOWNLOAD_TASK_CREATED};

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Consumer already started for topic '{0}'")]
    ConsumerStarted(String),
}

pub type Result<T> = std::result::Result<T, MessagingError>;

/// Error type handlers report back to the channel
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Message producer for publishing events
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Publish message to topic
    async fn publish(&self, topic: &str, message: Vec<u8>) -> Result<()>;

    /// Health check
    async fn health(&self) -> bool;
}

/// Consumer-side callback for one topic
///
/// Returning an error asks the channel to redeliver the message later.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &[u8]) -> std::result::Result<(), HandlerError>;
}

/// How often and how fast a failed delivery is retried
#[derive(Debug, Clone, Copy)]
pub struct RedeliveryPolicy {
    /// Total attempts, including the first delivery
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl From<&crate::config::MqConfig> for RedeliveryPolicy {
    fn from(config: &crate::config::MqConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.redelivery_backoff.0,
        }
    }
}
