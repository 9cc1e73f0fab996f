/// Fjall-based persistence for download tasks
///
/// The store owns three partitions:
///
/// - `tasks`: one JSON row per task, keyed by big-endian id
/// - `by_account`: secondary index for per-account listing
/// - `metadata`: the persisted id counter
///
/// Multi-row changes go through [`TaskTransaction`], which stages writes and
/// applies them as one atomic batch. Exclusive row locks are what the claim
/// step of the engine uses to guarantee a task is handed to one executor.
///
/// ## Usage
///
/// ```rust,ignore
/// use fetchtask::store::TaskStore;
///
/// let store = TaskStore::open("data/tasks", Duration::from_secs(5))?;
/// let id = store.create(Task::new(account_id, source))?;
///
/// let mut tx = store.begin();
/// let mut task = tx.get_with_exclusive_lock(id, &cancel).await?;
/// task.mark_downloading(Utc::now());
/// tx.update(task);
/// tx.commit()?;
/// ```

pub mod error;
pub mod keys;
mod locks;
#[allow(clippy::module_inception)]
pub mod store;

pub use error::{Result, StoreError};
pub use locks::RowLockGuard;
pub use store::{StoreStats, TaskStore, TaskTransaction};
