//! Account-facing task use-cases
//!
//! Every operation takes the caller's already-verified account id. Reads
//! and writes of a single task check ownership; writes do so under the
//! task's row lock so they serialize with the engine's claim step.

pub mod validation;

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::downloader::DownloaderRegistry;
use crate::error::{Result, TaskError};
use crate::messaging::{DownloadTaskCreated, MessageProducer, TOPIC_DOWNLOAD_TASK_CREATED};
use crate::observability::Metrics;
use crate::storage::{BlobStorage, BlobStream};
use crate::store::TaskStore;
use crate::task::{DownloadStatus, DownloadType, SourceDescriptor, Task};

pub use validation::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

/// One page of an account's tasks
#[derive(Debug, Clone)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: u64,
}

/// Payload stream of a finished task
pub struct TaskFile {
    pub task: Task,
    pub file_name: String,
    pub stream: BlobStream,
}

pub struct TaskService {
    store: Arc<TaskStore>,
    storage: BlobStorage,
    downloaders: Arc<DownloaderRegistry>,
    producer: Arc<dyn MessageProducer>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl TaskService {
    pub fn new(
        store: Arc<TaskStore>,
        storage: BlobStorage,
        downloaders: Arc<DownloaderRegistry>,
        producer: Arc<dyn MessageProducer>,
        metrics: Arc<Metrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            storage,
            downloaders,
            producer,
            metrics,
            shutdown,
        }
    }

    /// Insert a PENDING task and announce it on the event channel
    ///
    /// The row is committed before the event is published so a fast
    /// consumer always finds it; if publishing fails the row is removed.
    pub async fn create_task(
        &self,
        account_id: u64,
        download_type: DownloadType,
        url: &str,
    ) -> Result<Task> {
        validation::validate_source_url(download_type, url)?;
        if !self.downloaders.supports(download_type) {
            return Err(TaskError::InvalidArgument(format!(
                "download type '{}' is not supported",
                download_type
            )));
        }

        let mut task = Task::new(account_id, SourceDescriptor::new(download_type, url));
        let mut tx = self.store.begin();
        task.id = tx.create(task.clone())?;
        tx.commit()?;

        let published = match (DownloadTaskCreated { id: task.id }).encode() {
            Ok(payload) => self.producer.publish(TOPIC_DOWNLOAD_TASK_CREATED, payload).await,
            Err(e) => Err(e),
        };

        if let Err(e) = published {
            warn!(task_id = task.id, error = %e, "Publish failed, rolling back task");
            if let Err(rollback) = self.remove_unannounced(task.id).await {
                warn!(task_id = task.id, error = %rollback, "Failed to remove unannounced task");
            }
            return Err(e.into());
        }

        self.metrics.task_created();
        info!(task_id = task.id, account_id, download_type = %download_type, "Task created");
        Ok(task)
    }

    // A dispatch run may be claiming the row; the delete waits for its lock.
    async fn remove_unannounced(&self, id: u64) -> Result<()> {
        let mut tx = self.store.begin();
        let task = tx.get_with_exclusive_lock(id, &self.shutdown).await?;
        tx.delete(&task);
        tx.commit()?;
        Ok(())
    }

    pub fn list_tasks(&self, account_id: u64, offset: usize, limit: usize) -> Result<TaskPage> {
        let limit = validation::page_limit(limit);
        let total = self.store.count_of_account(account_id)?;
        let tasks = self.store.list_of_account(account_id, offset, limit)?;
        Ok(TaskPage { tasks, total })
    }

    pub fn get_task(&self, account_id: u64, id: u64) -> Result<Task> {
        let task = self.store.get(id)?;
        ensure_owner(&task, account_id)?;
        Ok(task)
    }

    /// Point a task at a new URL; the status is left as is
    pub async fn update_task_url(&self, account_id: u64, id: u64, url: &str) -> Result<Task> {
        let mut tx = self.store.begin();
        let mut task = tx.get_with_exclusive_lock(id, &self.shutdown).await?;
        ensure_owner(&task, account_id)?;
        validation::validate_source_url(task.source.download_type, url)?;

        task.source.url = url.to_string();
        task.updated_at = Utc::now();
        tx.update(task.clone());
        tx.commit()?;

        info!(task_id = id, account_id, "Task url updated");
        Ok(task)
    }

    /// Delete a task; its payload, if any, is removed afterwards on a
    /// best-effort basis
    pub async fn delete_task(&self, account_id: u64, id: u64) -> Result<()> {
        let task = {
            let mut tx = self.store.begin();
            let task = tx.get_with_exclusive_lock(id, &self.shutdown).await?;
            ensure_owner(&task, account_id)?;
            tx.delete(&task);
            tx.commit()?;
            task
        };

        info!(task_id = id, account_id, "Task deleted");

        if let Some(file_name) = task.file_name() {
            if let Err(e) = self.storage.delete(file_name).await {
                warn!(task_id = id, file = file_name, error = %e, "Failed to remove payload");
            }
        }
        Ok(())
    }

    /// Stream the payload of a SUCCESS task
    pub async fn get_task_file(&self, account_id: u64, id: u64) -> Result<TaskFile> {
        let task = self.get_task(account_id, id)?;

        if task.status != DownloadStatus::Success {
            return Err(TaskError::InvalidState {
                id,
                status: task.status,
                expected: DownloadStatus::Success,
            });
        }

        let file_name = task
            .file_name()
            .ok_or_else(|| TaskError::Internal(format!("task {} has no file name", id)))?
            .to_string();
        let stream = self.storage.open_for_read(&file_name).await?;

        Ok(TaskFile {
            task,
            file_name,
            stream,
        })
    }

    pub async fn health(&self) -> bool {
        self.store.health_check().is_ok() && self.producer.health().await
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

fn ensure_owner(task: &Task, account_id: u64) -> Result<()> {
    if task.is_owned_by(account_id) {
        Ok(())
    } else {
        Err(TaskError::PermissionDenied {
            id: task.id,
            account_id,
        })
    }
}
