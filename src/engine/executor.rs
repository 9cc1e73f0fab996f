use chrono::Utc;
use std::fmt::Display;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::downloader::{DownloadError, DownloaderRegistry};
use crate::error::{Result, TaskError};
use crate::observability::Metrics;
use crate::storage::BlobStorage;
use crate::store::{StoreError, TaskStore};
use crate::task::{DownloadStatus, Task, file_key};

/// Result of the claim step
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now owns the download; the snapshot is DOWNLOADING
    Claimed(Task),
    /// Someone else got there first, or the task is not PENDING
    NotClaimed(DownloadStatus),
}

/// Result of a full execution attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(Task),
    NotClaimed(DownloadStatus),
}

/// Runs the claim, download and finalize sequence for one task
pub struct TaskExecutor {
    store: Arc<TaskStore>,
    storage: BlobStorage,
    downloaders: Arc<DownloaderRegistry>,
    metrics: Arc<Metrics>,
}

impl TaskExecutor {
    pub fn new(
        store: Arc<TaskStore>,
        storage: BlobStorage,
        downloaders: Arc<DownloaderRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            storage,
            downloaders,
            metrics,
        }
    }

    /// Atomically move a PENDING task to DOWNLOADING
    ///
    /// The row lock is held only for the read-check-write; when several
    /// callers race on the same id exactly one of them sees PENDING.
    pub async fn claim(&self, id: u64, cancel: &CancellationToken) -> Result<ClaimOutcome> {
        let mut tx = self.store.begin();
        let mut task = tx.get_with_exclusive_lock(id, cancel).await?;

        if task.status != DownloadStatus::Pending {
            debug!(task_id = id, status = %task.status, "Task not pending, skipping");
            return Ok(ClaimOutcome::NotClaimed(task.status));
        }

        task.mark_downloading(Utc::now());
        tx.update(task.clone());
        tx.commit()?;

        self.metrics.task_claimed();
        info!(task_id = id, "Task claimed");
        Ok(ClaimOutcome::Claimed(task))
    }

    /// Claim `id` and, if this call won the claim, download and finalize it
    ///
    /// Download failures are recorded as FAILED and returned. A cancelled
    /// download leaves the task DOWNLOADING for the recovery sweep.
    pub async fn execute(&self, id: u64, cancel: &CancellationToken) -> Result<ExecutionOutcome> {
        let task = match self.claim(id, cancel).await? {
            ClaimOutcome::Claimed(task) => task,
            ClaimOutcome::NotClaimed(status) => return Ok(ExecutionOutcome::NotClaimed(status)),
        };

        self.run_claimed(task, cancel)
            .await
            .map(ExecutionOutcome::Completed)
    }

    async fn run_claimed(&self, task: Task, cancel: &CancellationToken) -> Result<Task> {
        let downloader = match self.downloaders.get(task.source.download_type) {
            Ok(downloader) => downloader,
            Err(e) => {
                self.finalize_failed(task.id, &e).await;
                return Err(e.into());
            }
        };

        let key = file_key(task.id);
        let mut sink = self.storage.open_for_write(&key);

        let metadata = match downloader.download(&task.source, &mut sink, cancel).await {
            Ok(metadata) => metadata,
            Err(DownloadError::Cancelled) => {
                if let Err(e) = sink.abort().await {
                    debug!(task_id = task.id, error = %e, "Failed to abort upload");
                }
                warn!(task_id = task.id, "Download cancelled, task left downloading");
                return Err(TaskError::Cancelled);
            }
            Err(e) => {
                if let Err(abort_err) = sink.abort().await {
                    debug!(task_id = task.id, error = %abort_err, "Failed to abort upload");
                }
                self.finalize_failed(task.id, &e).await;
                return Err(e.into());
            }
        };

        if let Err(e) = sink.finish().await {
            self.finalize_failed(task.id, &e).await;
            return Err(e.into());
        }

        // Written onto the row as it is now, so edits made during the
        // download are kept
        let finished = self
            .store
            .modify(task.id, |row| row.mark_success(metadata, key.clone()))
            .await;
        let task = match finished {
            Ok(task) => task,
            Err(StoreError::NotFound(id)) => {
                // Deleted while downloading; drop the orphaned payload
                warn!(task_id = id, "Task deleted during download, removing payload");
                if let Err(e) = self.storage.delete(&key).await {
                    warn!(task_id = id, error = %e, "Failed to remove orphaned payload");
                }
                return Err(TaskError::NotFound(id));
            }
            Err(e) => {
                error!(task_id = task.id, error = %e, "Failed to record task success");
                return Err(e.into());
            }
        };

        self.metrics.task_succeeded();
        info!(task_id = task.id, file = %key, "Task completed");
        Ok(task)
    }

    // The FAILED write is best-effort; the download error is what surfaces.
    async fn finalize_failed(&self, id: u64, cause: &(dyn Display + Sync)) {
        match self.store.modify(id, Task::mark_failed).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => debug!(task_id = id, "Failed task was deleted"),
            Err(e) => error!(task_id = id, error = %e, "Failed to record task failure"),
        }

        self.metrics.task_failed();
        error!(task_id = id, error = %cause, "Download task failed");
    }
}
