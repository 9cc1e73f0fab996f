use thiserror::Error;

use crate::downloader::DownloadError;
use crate::messaging::MessagingError;
use crate::storage::StorageError;
use crate::store::StoreError;
use crate::task::DownloadStatus;

/// Errors surfaced by task use-cases and the execution engine
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task {0} not found")]
    NotFound(u64),

    #[error("Timed out waiting for the lock on task {0}")]
    LockTimeout(u64),

    #[error("Task {id} is not owned by account {account_id}")]
    PermissionDenied { id: u64, account_id: u64 },

    #[error("Task {id} is {status}, expected {expected}")]
    InvalidState {
        id: u64,
        status: DownloadStatus,
        expected: DownloadStatus,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for TaskError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => TaskError::NotFound(id),
            StoreError::LockTimeout(id) => TaskError::LockTimeout(id),
            StoreError::Cancelled(_) => TaskError::Cancelled,
            other => TaskError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;
