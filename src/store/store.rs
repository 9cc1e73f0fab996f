use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::task::{DownloadStatus, Task};

use super::error::{Result, StoreError};
use super::keys::{
    META_NEXT_ID, decode_account_key, decode_task_key, encode_account_key,
    encode_account_prefix, encode_task_key,
};
use super::locks::{RowLockGuard, RowLocks};

/// Fjall-backed task table
///
/// Single-row reads go straight to the `tasks` partition and scans read a
/// snapshot. Every write goes through one write gate and lands as an atomic
/// fjall batch, which gives transactions and the bulk requeue all-or-nothing
/// visibility.
///
/// Existing rows are only rewritten or removed by the holder of their row
/// lock, taken through [`TaskTransaction::get_with_exclusive_lock`]. The bulk
/// requeue skips rows that are locked, so a lock holder's read stays current
/// until it commits.
pub struct TaskStore {
    keyspace: Keyspace,
    tasks: PartitionHandle,
    by_account: PartitionHandle,
    metadata: PartitionHandle,
    next_id: AtomicU64,
    write_gate: Mutex<()>,
    row_locks: Arc<RowLocks>,
    lock_timeout: Duration,
}

impl TaskStore {
    /// Open or create a task store at the given path
    pub fn open<P: AsRef<Path>>(path: P, lock_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening task store at: {}", path.display());

        std::fs::create_dir_all(path)?;

        let keyspace = Config::new(path).open()?;
        let tasks = keyspace.open_partition("tasks", PartitionCreateOptions::default())?;
        let by_account =
            keyspace.open_partition("by_account", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        // Ids start at 1, like an auto-increment column
        let next_id = match metadata.get(META_NEXT_ID)? {
            Some(bytes) => decode_task_key(&bytes)?,
            None => 1,
        };

        info!(next_id, "Task store opened");

        Ok(Self {
            keyspace,
            tasks,
            by_account,
            metadata,
            next_id: AtomicU64::new(next_id),
            write_gate: Mutex::new(()),
            row_locks: RowLocks::new(),
            lock_timeout,
        })
    }

    /// Start a transaction; nothing is visible to other readers until commit
    pub fn begin(&self) -> TaskTransaction<'_> {
        TaskTransaction {
            store: self,
            held: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Insert a PENDING task in its own transaction and return its id
    pub fn create(&self, task: Task) -> Result<u64> {
        let mut tx = self.begin();
        let id = tx.create(task)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn get(&self, id: u64) -> Result<Task> {
        match self.tasks.get(encode_task_key(id))? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Err(StoreError::NotFound(id)),
        }
    }

    /// Apply `f` to the current row under its row lock and commit the result
    ///
    /// Waits at most the store's lock timeout. Fails with `NotFound` if the
    /// row was deleted in the meantime.
    pub async fn modify<F>(&self, id: u64, f: F) -> Result<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut tx = self.begin();
        let mut task = tx
            .get_with_exclusive_lock(id, &CancellationToken::new())
            .await?;
        f(&mut task);
        tx.update(task.clone());
        tx.commit()?;

        debug!(task_id = id, status = %task.status, "Task updated");
        Ok(task)
    }

    /// Ids of all PENDING tasks as of one snapshot
    pub fn list_pending_ids(&self) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for item in self.tasks.snapshot().iter() {
            let (key, value) = item.map_err(fjall::Error::from)?;
            let task: Task = serde_json::from_slice(&value)?;
            if task.status == DownloadStatus::Pending {
                ids.push(decode_task_key(&key)?);
            }
        }

        Ok(ids)
    }

    /// Move every DOWNLOADING and FAILED task back to PENDING in one batch
    pub fn reset_downloading_and_failed_to_pending(&self) -> Result<usize> {
        self.reset_to_pending(None)
    }

    /// Like [`Self::reset_downloading_and_failed_to_pending`], but DOWNLOADING
    /// tasks claimed after `claimed_before` are left alone
    ///
    /// Candidates come from a snapshot scan that blocks nobody. They are then
    /// re-read and written in one batch while no row lock can be taken, and
    /// rows locked at that moment are left for the next run.
    pub fn reset_to_pending(&self, claimed_before: Option<DateTime<Utc>>) -> Result<usize> {
        let mut candidates = Vec::new();
        for item in self.tasks.snapshot().iter() {
            let (key, value) = item.map_err(fjall::Error::from)?;
            let task: Task = serde_json::from_slice(&value)?;
            if requeue_eligible(&task, claimed_before) {
                candidates.push(decode_task_key(&key)?);
            }
        }

        if candidates.is_empty() {
            debug!("Nothing to requeue");
            return Ok(0);
        }

        let now = Utc::now();
        let (requeued, skipped) = self.row_locks.frozen(|is_locked| {
            let _gate = self.gate()?;
            let mut batch = self.keyspace.batch();
            let mut requeued = 0;
            let mut skipped = 0;

            for id in candidates {
                if is_locked(id) {
                    skipped += 1;
                    continue;
                }

                let key = encode_task_key(id);
                let Some(value) = self.tasks.get(key)? else {
                    continue;
                };
                let mut task: Task = serde_json::from_slice(&value)?;
                if !requeue_eligible(&task, claimed_before) {
                    continue;
                }

                task.requeue(now);
                batch.insert(&self.tasks, key, serde_json::to_vec(&task)?);
                requeued += 1;
            }

            batch.commit()?;
            Ok((requeued, skipped))
        })?;

        info!(requeued, skipped, "Requeued downloading and failed tasks");
        Ok(requeued)
    }

    /// A page of an account's tasks in id order
    pub fn list_of_account(&self, account_id: u64, offset: usize, limit: usize) -> Result<Vec<Task>> {
        let mut tasks = Vec::with_capacity(limit);

        for item in self
            .by_account
            .prefix(encode_account_prefix(account_id))
            .skip(offset)
            .take(limit)
        {
            let (key, _) = item?;
            let id = decode_account_key(&key)?;
            match self.get(id) {
                Ok(task) => tasks.push(task),
                // Deleted between the index scan and the row read
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(tasks)
    }

    pub fn count_of_account(&self, account_id: u64) -> Result<u64> {
        let mut count = 0;
        for item in self.by_account.prefix(encode_account_prefix(account_id)) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Verify the keyspace is readable
    pub fn health_check(&self) -> Result<()> {
        let _ = self.metadata.get(META_NEXT_ID)?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for item in self.tasks.snapshot().iter() {
            let (_, value) = item.map_err(fjall::Error::from)?;
            let task: Task = serde_json::from_slice(&value)?;
            match task.status {
                DownloadStatus::Pending => stats.pending += 1,
                DownloadStatus::Downloading => stats.downloading += 1,
                DownloadStatus::Success => stats.success += 1,
                DownloadStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    fn gate(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_gate.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn requeue_eligible(task: &Task, claimed_before: Option<DateTime<Utc>>) -> bool {
    match task.status {
        DownloadStatus::Failed => true,
        DownloadStatus::Downloading => match (claimed_before, task.claimed_at) {
            (Some(cutoff), Some(claimed_at)) => claimed_at <= cutoff,
            _ => true,
        },
        DownloadStatus::Pending | DownloadStatus::Success => false,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub pending: usize,
    pub downloading: usize,
    pub success: usize,
    pub failed: usize,
}

enum StagedWrite {
    Insert(Task),
    Update(Task),
    Delete { id: u64, account_id: u64 },
}

/// A unit of work against the task store
///
/// Writes are staged in memory and applied as one fjall batch on
/// [`commit`](Self::commit). Row locks are held until the transaction is
/// committed or dropped; dropping without commit discards the staged writes.
pub struct TaskTransaction<'a> {
    store: &'a TaskStore,
    held: Vec<RowLockGuard>,
    writes: Vec<StagedWrite>,
}

impl TaskTransaction<'_> {
    /// Stage a new PENDING row and return the id it will have
    pub fn create(&mut self, mut task: Task) -> Result<u64> {
        if task.status != DownloadStatus::Pending {
            return Err(StoreError::Constraint(format!(
                "new task must be pending, got {}",
                task.status
            )));
        }

        let id = self.store.next_id.fetch_add(1, Ordering::SeqCst);
        task.id = id;
        self.writes.push(StagedWrite::Insert(task));
        Ok(id)
    }

    /// Read a task while holding its exclusive row lock
    ///
    /// Blocks until other holders release the row, the store's lock timeout
    /// elapses (`LockTimeout`), or `cancel` fires (`Cancelled`).
    pub async fn get_with_exclusive_lock(
        &mut self,
        id: u64,
        cancel: &CancellationToken,
    ) -> Result<Task> {
        if !self.held.iter().any(|guard| guard.id() == id) {
            let guard = self
                .store
                .row_locks
                .acquire(id, self.store.lock_timeout, cancel)
                .await?;
            self.held.push(guard);
        }

        self.store.get(id)
    }

    /// Stage a full-row overwrite
    pub fn update(&mut self, task: Task) {
        self.writes.push(StagedWrite::Update(task));
    }

    /// Stage removal of a row and its index entry
    pub fn delete(&mut self, task: &Task) {
        self.writes.push(StagedWrite::Delete {
            id: task.id,
            account_id: task.account_id,
        });
    }

    /// Apply all staged writes atomically, then release row locks
    pub fn commit(self) -> Result<()> {
        if self.writes.is_empty() {
            return Ok(());
        }

        let store = self.store;
        let _gate = store.gate()?;
        let mut batch = store.keyspace.batch();
        let mut max_inserted = None;

        for write in &self.writes {
            match write {
                StagedWrite::Insert(task) => {
                    let key = encode_task_key(task.id);
                    if store.tasks.contains_key(key)? {
                        return Err(StoreError::Constraint(format!(
                            "duplicate task id {}",
                            task.id
                        )));
                    }
                    batch.insert(&store.tasks, key, serde_json::to_vec(task)?);
                    batch.insert(
                        &store.by_account,
                        encode_account_key(task.account_id, task.id),
                        Vec::<u8>::new(),
                    );
                    max_inserted = max_inserted.max(Some(task.id));
                }
                StagedWrite::Update(task) => {
                    let key = encode_task_key(task.id);
                    if !store.tasks.contains_key(key)? {
                        return Err(StoreError::NotFound(task.id));
                    }
                    batch.insert(&store.tasks, key, serde_json::to_vec(task)?);
                }
                StagedWrite::Delete { id, account_id } => {
                    batch.remove(&store.tasks, encode_task_key(*id));
                    batch.remove(&store.by_account, encode_account_key(*account_id, *id));
                }
            }
        }

        if let Some(id) = max_inserted {
            let next = store.next_id.load(Ordering::SeqCst).max(id + 1);
            batch.insert(&store.metadata, META_NEXT_ID, encode_task_key(next));
        }

        batch.commit()?;

        debug!(writes = self.writes.len(), "Transaction committed");
        Ok(())
    }
}
