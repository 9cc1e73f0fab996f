//! Blob storage for downloaded payloads
//!
//! Backed by the `object_store` crate so the same streaming contract works
//! in memory, on a local directory, or against S3-compatible storage.

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{ObjectStore, path::Path as StoragePath};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::{StorageConfig, StorageProvider};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Stream of payload chunks read back from storage
pub type BlobStream = BoxStream<'static, Result<Bytes>>;

/// Blob store wrapping an `object_store` backend
#[derive(Clone)]
pub struct BlobStorage {
    store: Arc<dyn ObjectStore>,
    pub bucket: String,
}

impl BlobStorage {
    /// Create a blob store over any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>, bucket: String) -> Self {
        Self { store, bucket }
    }

    /// In-memory storage for tests and local development
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "fetchtask-memory".to_string())
    }

    /// Files under `directory`, created if missing
    pub fn local(directory: &Path) -> Result<Self> {
        std::fs::create_dir_all(directory)?;
        let store = LocalFileSystem::new_with_prefix(directory)?;
        Ok(Self::new(
            Arc::new(store),
            directory.display().to_string(),
        ))
    }

    /// S3-compatible storage; a custom endpoint enables path-style HTTP access
    pub fn s3(config: &StorageConfig) -> Result<Self> {
        let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key)
        else {
            return Err(StorageError::InvalidConfig(
                "S3 credentials are not set".to_string(),
            ));
        };

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }

        Ok(Self::new(Arc::new(builder.build()?), config.bucket.clone()))
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let storage = match config.provider {
            StorageProvider::Memory => Self::in_memory(),
            StorageProvider::Local => Self::local(&config.directory)?,
            StorageProvider::S3 => Self::s3(config)?,
        };

        tracing::info!(
            provider = ?config.provider,
            bucket = %storage.bucket,
            "Blob storage initialized"
        );
        Ok(storage)
    }

    /// Start a streaming upload to `key`
    ///
    /// Nothing is visible under `key` until [`BlobWriter::finish`] succeeds.
    pub fn open_for_write(&self, key: &str) -> BlobWriter {
        BlobWriter {
            key: key.to_string(),
            inner: BufWriter::new(Arc::clone(&self.store), StoragePath::from(key)),
            written: 0,
        }
    }

    /// Stream the payload stored under `key`
    pub async fn open_for_read(&self, key: &str) -> Result<BlobStream> {
        let path = StoragePath::from(key);

        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(key, size = result.meta.size, "Opened blob for read");

        let key = key.to_string();
        Ok(result
            .into_stream()
            .map(move |chunk| {
                chunk.map_err(|e| StorageError::DownloadFailed(format!("{}: {}", key, e)))
            })
            .boxed())
    }

    /// Remove a payload; a missing key is not an error
    pub async fn delete(&self, key: &str) -> Result<()> {
        match self.store.delete(&StoragePath::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                tracing::debug!(key, "Deleted blob");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Streaming sink for one payload
pub struct BlobWriter {
    key: String,
    inner: BufWriter,
    written: u64,
}

impl BlobWriter {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Append a chunk
    pub async fn write(&mut self, chunk: Bytes) -> Result<()> {
        let len = chunk.len() as u64;
        self.inner
            .put(chunk)
            .await
            .map_err(|e| StorageError::UploadFailed(format!("{}: {}", self.key, e)))?;
        self.written += len;
        Ok(())
    }

    /// Complete the upload and return the payload size
    pub async fn finish(mut self) -> Result<u64> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| StorageError::UploadFailed(format!("{}: {}", self.key, e)))?;

        tracing::info!(key = %self.key, size = self.written, "Uploaded to storage");
        Ok(self.written)
    }

    /// Discard everything written so far
    pub async fn abort(mut self) -> Result<()> {
        self.inner.abort().await?;
        tracing::debug!(key = %self.key, "Upload aborted");
        Ok(())
    }
}
