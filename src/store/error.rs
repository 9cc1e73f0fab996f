use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task not found: id={0}")]
    NotFound(u64),

    #[error("Timed out waiting for lock on task {0}")]
    LockTimeout(u64),

    #[error("Lock wait on task {0} cancelled")]
    Cancelled(u64),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    #[error("Store write lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;
