//! Pluggable download strategies
//!
//! A [`Downloader`] streams the payload described by a task's
//! [`SourceDescriptor`] into a [`BlobWriter`] and returns metadata about what
//! it fetched. Strategies are looked up by [`DownloadType`] through the
//! [`DownloaderRegistry`].

pub mod http;
pub mod registry;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::storage::{BlobWriter, StorageError};
use crate::task::{DownloadType, Metadata, SourceDescriptor};

pub use http::{HttpConfig, HttpDownloader};
pub use registry::DownloaderRegistry;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("No downloader registered for type '{0}'")]
    UnsupportedType(DownloadType),

    #[error("Payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Sink error: {0}")]
    Sink(#[from] StorageError),

    #[error("Download cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DownloadError>;

/// Strategy for one download type
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Stream the payload into `sink` without buffering it whole
    ///
    /// Must return [`DownloadError::Cancelled`] promptly once `cancel` fires.
    /// The caller finishes or aborts the sink.
    async fn download(
        &self,
        source: &SourceDescriptor,
        sink: &mut BlobWriter,
        cancel: &CancellationToken,
    ) -> Result<Metadata>;
}
