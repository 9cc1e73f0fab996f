//! Shared fixtures for unit tests

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::downloader::{DownloadError, Downloader, DownloaderRegistry, Result};
use crate::engine::TaskExecutor;
use crate::observability::Metrics;
use crate::storage::{BlobStorage, BlobWriter};
use crate::store::TaskStore;
use crate::task::{DownloadType, Metadata, SourceDescriptor, Task};

/// Writes a fixed payload, optionally after a delay, and records concurrency
#[derive(Default)]
pub struct FixedDownloader {
    payload: Bytes,
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FixedDownloader {
    pub fn new(payload: &[u8], delay: Duration) -> Self {
        Self {
            payload: Bytes::copy_from_slice(payload),
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for FixedDownloader {
    async fn download(
        &self,
        source: &SourceDescriptor,
        sink: &mut BlobWriter,
        cancel: &CancellationToken,
    ) -> Result<Metadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let waited = tokio::select! {
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
            _ = tokio::time::sleep(self.delay) => Ok(()),
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        waited?;

        sink.write(self.payload.clone()).await?;

        let mut metadata = Metadata::new();
        metadata.insert("url".to_string(), Value::String(source.url.clone()));
        metadata.insert("size".to_string(), Value::from(self.payload.len()));
        Ok(metadata)
    }
}

/// Always fails like an unreachable host
pub struct FailingDownloader;

#[async_trait]
impl Downloader for FailingDownloader {
    async fn download(
        &self,
        _source: &SourceDescriptor,
        sink: &mut BlobWriter,
        _cancel: &CancellationToken,
    ) -> Result<Metadata> {
        sink.write(Bytes::from_static(b"partial")).await?;
        Err(DownloadError::RequestFailed("connection refused".to_string()))
    }
}

/// Blocks until the returned semaphore grants a permit or the download is
/// cancelled
pub struct GatedDownloader {
    inner: FixedDownloader,
    gate: Arc<Semaphore>,
}

pub fn gated_downloader(payload: &[u8]) -> (Arc<GatedDownloader>, Arc<Semaphore>) {
    let gate = Arc::new(Semaphore::new(0));
    let downloader = Arc::new(GatedDownloader {
        inner: FixedDownloader::new(payload, Duration::ZERO),
        gate: gate.clone(),
    });
    (downloader, gate)
}

#[async_trait]
impl Downloader for GatedDownloader {
    async fn download(
        &self,
        source: &SourceDescriptor,
        sink: &mut BlobWriter,
        cancel: &CancellationToken,
    ) -> Result<Metadata> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            permit = self.gate.acquire() => {
                permit.map_err(|_| DownloadError::Cancelled)?.forget();
            }
        }
        self.inner.download(source, sink, cancel).await
    }
}

/// Store, storage and executor wired over a temp directory
pub struct TestHarness {
    pub store: Arc<TaskStore>,
    pub storage: BlobStorage,
    pub metrics: Arc<Metrics>,
    pub downloaders: Arc<DownloaderRegistry>,
    pub executor: Arc<TaskExecutor>,
    fixed: Option<Arc<FixedDownloader>>,
    _temp: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_payload(b"test payload")
    }

    pub fn with_payload(payload: &[u8]) -> Self {
        Self::with_fixed(FixedDownloader::new(payload, Duration::ZERO))
    }

    pub fn with_delay(payload: &[u8], delay: Duration) -> Self {
        Self::with_fixed(FixedDownloader::new(payload, delay))
    }

    pub fn failing() -> Self {
        Self::with_downloader(Arc::new(FailingDownloader))
    }

    pub fn with_downloader(downloader: Arc<dyn Downloader>) -> Self {
        Self::build(downloader, None, Duration::from_secs(5))
    }

    /// Fixed downloader over a store whose row locks give up after `timeout`
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        let fixed = Arc::new(FixedDownloader::new(b"test payload", Duration::ZERO));
        Self::build(fixed.clone(), Some(fixed), timeout)
    }

    fn with_fixed(downloader: FixedDownloader) -> Self {
        let fixed = Arc::new(downloader);
        Self::build(fixed.clone(), Some(fixed), Duration::from_secs(5))
    }

    fn build(
        downloader: Arc<dyn Downloader>,
        fixed: Option<Arc<FixedDownloader>>,
        lock_timeout: Duration,
    ) -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::open(temp.path().join("tasks"), lock_timeout).unwrap());
        let storage = BlobStorage::in_memory();
        let metrics = Arc::new(Metrics::new());

        let mut registry = DownloaderRegistry::new();
        registry.register(DownloadType::Http, downloader);
        let downloaders = Arc::new(registry);

        let executor = Arc::new(TaskExecutor::new(
            store.clone(),
            storage.clone(),
            downloaders.clone(),
            metrics.clone(),
        ));

        Self {
            store,
            storage,
            metrics,
            downloaders,
            executor,
            fixed,
            _temp: temp,
        }
    }

    pub fn create_http_task(&self, account_id: u64, url: &str) -> u64 {
        self.store
            .create(Task::new(
                account_id,
                SourceDescriptor::new(DownloadType::Http, url),
            ))
            .unwrap()
    }

    pub async fn read_blob(&self, key: &str) -> Vec<u8> {
        let chunks: Vec<Bytes> = self
            .storage
            .open_for_read(key)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        chunks.concat()
    }

    /// Downloads started by the fixed downloader
    pub fn downloads(&self) -> usize {
        self.fixed.as_ref().map_or(0, |fixed| fixed.calls())
    }

    pub fn max_concurrent_downloads(&self) -> usize {
        self.fixed.as_ref().map_or(0, |fixed| fixed.max_active())
    }
}
