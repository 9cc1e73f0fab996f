//! End-to-end engine behaviour over a real fjall store and in-memory blobs

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

use fetchtask::downloader::{self, DownloadError, Downloader, DownloaderRegistry};
use fetchtask::engine::{
    BatchDispatcher, ClaimOutcome, ExecutionOutcome, RecoverySweep, TaskExecutor,
};
use fetchtask::error::TaskError;
use fetchtask::messaging::{InMemoryBus, RedeliveryPolicy};
use fetchtask::observability::Metrics;
use fetchtask::service::TaskService;
use fetchtask::storage::{BlobStorage, BlobWriter};
use fetchtask::store::TaskStore;
use fetchtask::task::{DownloadStatus, DownloadType, Metadata, SourceDescriptor, Task};

/// Echoes the source URL as the payload and tracks concurrency
///
/// With a gate, each download waits for one permit before writing.
struct EchoDownloader {
    gate: Option<Arc<Semaphore>>,
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl EchoDownloader {
    fn new(gate: Option<Arc<Semaphore>>, delay: Duration) -> Self {
        Self {
            gate,
            delay,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    async fn wait(&self, cancel: &CancellationToken) -> downloader::Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }
        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                permit = gate.acquire() => {
                    permit.map_err(|_| DownloadError::Cancelled)?.forget();
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Downloader for EchoDownloader {
    async fn download(
        &self,
        source: &SourceDescriptor,
        sink: &mut BlobWriter,
        cancel: &CancellationToken,
    ) -> downloader::Result<Metadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let waited = self.wait(cancel).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        waited?;

        sink.write(Bytes::from(source.url.clone().into_bytes())).await?;

        let mut metadata = Metadata::new();
        metadata.insert("url".to_string(), Value::String(source.url.clone()));
        Ok(metadata)
    }
}

struct Pipeline {
    store: Arc<TaskStore>,
    storage: BlobStorage,
    metrics: Arc<Metrics>,
    downloaders: Arc<DownloaderRegistry>,
    executor: Arc<TaskExecutor>,
    echo: Arc<EchoDownloader>,
    _temp: TempDir,
}

impl Pipeline {
    fn new(echo: EchoDownloader) -> Self {
        let temp = TempDir::new().unwrap();
        let store =
            Arc::new(TaskStore::open(temp.path().join("tasks"), Duration::from_secs(5)).unwrap());
        let storage = BlobStorage::in_memory();
        let metrics = Arc::new(Metrics::new());

        let echo = Arc::new(echo);
        let mut registry = DownloaderRegistry::new();
        registry.register(DownloadType::Http, echo.clone());
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
            echo,
            _temp: temp,
        }
    }

    fn create(&self, account_id: u64, url: &str) -> u64 {
        self.store
            .create(Task::new(
                account_id,
                SourceDescriptor::new(DownloadType::Http, url),
            ))
            .unwrap()
    }

    async fn read(&self, key: &str) -> Vec<u8> {
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

    fn service(&self) -> TaskService {
        TaskService::new(
            self.store.clone(),
            self.storage.clone(),
            self.downloaders.clone(),
            Arc::new(InMemoryBus::new(RedeliveryPolicy::default())),
            self.metrics.clone(),
            CancellationToken::new(),
        )
    }

    async fn wait_for_status(&self, id: u64, expected: DownloadStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.store.get(id).unwrap().status != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn test_task_seven_walks_the_lifecycle() {
    let gate = Arc::new(Semaphore::new(0));
    let pipeline = Pipeline::new(EchoDownloader::new(Some(gate.clone()), Duration::ZERO));

    let mut id = 0;
    for _ in 0..7 {
        id = pipeline.create(3, "http://x/y");
    }
    assert_eq!(id, 7);
    assert_eq!(pipeline.store.get(7).unwrap().status, DownloadStatus::Pending);

    let executor = pipeline.executor.clone();
    let run = tokio::spawn(async move { executor.execute(7, &CancellationToken::new()).await });

    pipeline.wait_for_status(7, DownloadStatus::Downloading).await;
    gate.add_permits(1);

    let outcome = run.await.unwrap().unwrap();
    let ExecutionOutcome::Completed(task) = outcome else {
        panic!("expected task 7 to complete");
    };

    assert_eq!(task.status, DownloadStatus::Success);
    assert_eq!(task.metadata["file-name"], "download_file_7");
    assert_eq!(pipeline.store.get(7).unwrap(), task);
    assert_eq!(pipeline.read("download_file_7").await, b"http://x/y");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let pipeline = Pipeline::new(EchoDownloader::new(None, Duration::ZERO));
    let id = pipeline.create(1, "http://x/y");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let executor = pipeline.executor.clone();
        handles.push(tokio::spawn(async move {
            executor.claim(id, &CancellationToken::new()).await
        }));
    }

    let mut claimed = 0;
    let mut not_claimed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ClaimOutcome::Claimed(task) => {
                assert_eq!(task.status, DownloadStatus::Downloading);
                claimed += 1;
            }
            ClaimOutcome::NotClaimed(status) => {
                assert_eq!(status, DownloadStatus::Downloading);
                not_claimed += 1;
            }
        }
    }

    assert_eq!(claimed, 1);
    assert_eq!(not_claimed, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_executions_download_once() {
    let pipeline = Pipeline::new(EchoDownloader::new(None, Duration::from_millis(20)));
    let id = pipeline.create(1, "http://x/y");

    let (token_a, token_b) = (CancellationToken::new(), CancellationToken::new());
    let (first, second) = tokio::join!(
        pipeline.executor.execute(id, &token_a),
        pipeline.executor.execute(id, &token_b),
    );

    let outcomes = [first.unwrap(), second.unwrap()];
    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, ExecutionOutcome::Completed(_)))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(pipeline.echo.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.store.get(id).unwrap().status, DownloadStatus::Success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatcher_respects_concurrency_limit() {
    let pipeline = Pipeline::new(EchoDownloader::new(None, Duration::from_millis(15)));
    let ids: Vec<u64> = (0..20)
        .map(|i| pipeline.create(1, &format!("http://x/{}", i)))
        .collect();

    let dispatcher = BatchDispatcher::new(pipeline.store.clone(), pipeline.executor.clone(), 3);
    let stats = dispatcher.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.total, 20);
    assert_eq!(stats.completed, 20);
    assert!(pipeline.echo.max_active.load(Ordering::SeqCst) <= 3);
    for id in ids {
        assert_eq!(pipeline.store.get(id).unwrap().status, DownloadStatus::Success);
    }
}

#[tokio::test]
async fn test_cancelled_download_is_recovered_by_sweep() {
    let gate = Arc::new(Semaphore::new(0));
    let pipeline = Pipeline::new(EchoDownloader::new(Some(gate.clone()), Duration::ZERO));
    let id = pipeline.create(1, "http://x/y");

    let cancel = CancellationToken::new();
    let executor = pipeline.executor.clone();
    let token = cancel.clone();
    let run = tokio::spawn(async move { executor.execute(id, &token).await });

    pipeline.wait_for_status(id, DownloadStatus::Downloading).await;
    cancel.cancel();

    let result = run.await.unwrap();
    assert!(matches!(
        result,
        Err(TaskError::Download(DownloadError::Cancelled)) | Err(TaskError::Cancelled)
    ));
    assert_eq!(pipeline.store.get(id).unwrap().status, DownloadStatus::Downloading);
    assert!(!pipeline.storage.exists(&format!("download_file_{}", id)).await.unwrap());

    let sweep = RecoverySweep::new(pipeline.store.clone(), pipeline.metrics.clone(), None);
    assert_eq!(sweep.run().unwrap(), 1);
    assert_eq!(pipeline.store.get(id).unwrap().status, DownloadStatus::Pending);

    gate.add_permits(1);
    let outcome = pipeline
        .executor
        .execute(id, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
    assert_eq!(pipeline.metrics.snapshot().tasks_requeued, 1);
}

#[tokio::test]
async fn test_sweep_leaves_nothing_downloading_or_failed() {
    let pipeline = Pipeline::new(EchoDownloader::new(None, Duration::ZERO));

    let statuses = [
        DownloadStatus::Pending,
        DownloadStatus::Downloading,
        DownloadStatus::Failed,
        DownloadStatus::Success,
        DownloadStatus::Downloading,
    ];
    for status in statuses {
        let id = pipeline.create(1, "http://x/y");
        pipeline
            .store
            .modify(id, |task| task.status = status)
            .await
            .unwrap();
    }

    let sweep = RecoverySweep::new(pipeline.store.clone(), pipeline.metrics.clone(), None);
    assert_eq!(sweep.run().unwrap(), 3);

    let stats = pipeline.store.stats().unwrap();
    assert_eq!(stats.downloading, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.pending, 4);
    assert_eq!(stats.success, 1);
}

#[tokio::test]
async fn test_delete_by_other_account_is_denied() {
    let pipeline = Pipeline::new(EchoDownloader::new(None, Duration::ZERO));
    let id = pipeline.create(1, "http://x/y");
    let before = pipeline.store.get(id).unwrap();

    let service = pipeline.service();
    let err = service.delete_task(2, id).await.unwrap_err();

    assert!(matches!(err, TaskError::PermissionDenied { account_id: 2, .. }));
    assert_eq!(pipeline.store.get(id).unwrap(), before);
}

#[tokio::test]
async fn test_delete_during_download_leaves_no_payload() {
    let gate = Arc::new(Semaphore::new(0));
    let pipeline = Pipeline::new(EchoDownloader::new(Some(gate.clone()), Duration::ZERO));
    let id = pipeline.create(1, "http://x/y");

    let executor = pipeline.executor.clone();
    let run = tokio::spawn(async move { executor.execute(id, &CancellationToken::new()).await });
    pipeline.wait_for_status(id, DownloadStatus::Downloading).await;

    pipeline.service().delete_task(1, id).await.unwrap();
    gate.add_permits(1);

    let result = run.await.unwrap();
    assert!(matches!(result, Err(TaskError::NotFound(missing)) if missing == id));
    assert!(!pipeline.storage.exists(&format!("download_file_{}", id)).await.unwrap());
    assert_eq!(pipeline.store.count_of_account(1).unwrap(), 0);
}

#[tokio::test]
async fn test_url_edit_during_download_survives_success() {
    let gate = Arc::new(Semaphore::new(0));
    let pipeline = Pipeline::new(EchoDownloader::new(Some(gate.clone()), Duration::ZERO));
    let id = pipeline.create(1, "http://x/y");

    let executor = pipeline.executor.clone();
    let run = tokio::spawn(async move { executor.execute(id, &CancellationToken::new()).await });
    pipeline.wait_for_status(id, DownloadStatus::Downloading).await;

    let edited = pipeline
        .service()
        .update_task_url(1, id, "http://x/edited")
        .await
        .unwrap();
    assert_eq!(edited.status, DownloadStatus::Downloading);
    gate.add_permits(1);

    let ExecutionOutcome::Completed(task) = run.await.unwrap().unwrap() else {
        panic!("expected completion");
    };
    assert_eq!(task.status, DownloadStatus::Success);
    assert_eq!(task.source.url, "http://x/edited");
    assert_eq!(pipeline.store.get(id).unwrap(), task);
    // The download already in flight used the old url
    assert_eq!(pipeline.read(&format!("download_file_{}", id)).await, b"http://x/y");
}
