//! Per-row exclusive locks
//!
//! Each task id maps to a fair async mutex. Entries are created on first
//! contention and dropped once no holder or waiter references them, so the
//! table only grows with the number of rows currently being locked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::{Result, StoreError};

#[derive(Debug, Default)]
pub(crate) struct RowLocks {
    rows: Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>,
}

impl RowLocks {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait for the exclusive lock on `id`
    ///
    /// Fails with `LockTimeout` once `timeout` elapses and with `Cancelled`
    /// when `cancel` fires first.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        id: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<RowLockGuard> {
        let row = {
            let mut rows = self.rows.lock().map_err(|_| StoreError::Poisoned)?;
            rows.entry(id).or_default().clone()
        };

        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StoreError::Cancelled(id)),
            locked = tokio::time::timeout(timeout, row.clone().lock_owned()) => {
                locked.map_err(|_| StoreError::LockTimeout(id))
            }
        };

        drop(row);

        match acquired {
            Ok(guard) => {
                debug!(task_id = id, "Row lock acquired");
                Ok(RowLockGuard {
                    id,
                    guard: Some(guard),
                    locks: Arc::clone(self),
                })
            }
            Err(e) => {
                self.release(id);
                Err(e)
            }
        }
    }

    /// Run `f` while no new row lock can be taken
    ///
    /// `f` is told whether a row is currently held or awaited. Acquirers
    /// that arrive meanwhile wait for `f` to return and then see its writes.
    pub(crate) fn frozen<T>(&self, f: impl FnOnce(&dyn Fn(u64) -> bool) -> Result<T>) -> Result<T> {
        let rows = self.rows.lock().map_err(|_| StoreError::Poisoned)?;
        f(&|id| rows.contains_key(&id))
    }

    /// Number of rows with a live lock entry
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    // Entries are only cloned under the table lock, so a strong count of one
    // means nobody holds or waits on this row.
    fn release(&self, id: u64) {
        if let Ok(mut rows) = self.rows.lock() {
            if rows.get(&id).is_some_and(|row| Arc::strong_count(row) == 1) {
                rows.remove(&id);
            }
        }
    }
}

/// Holds a row lock until dropped
#[derive(Debug)]
pub struct RowLockGuard {
    id: u64,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<RowLocks>,
}

impl RowLockGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for RowLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(self.id);
        debug!(task_id = self.id, "Row lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_times_out_while_held() {
        let locks = RowLocks::new();
        let cancel = CancellationToken::new();

        let guard = locks
            .acquire(1, Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert_eq!(guard.id(), 1);

        let err = locks
            .acquire(1, Duration::from_millis(50), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(1)));

        // Other rows are independent
        let other = locks.acquire(2, Duration::from_millis(50), &cancel).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let locks = RowLocks::new();
        let cancel = CancellationToken::new();

        let guard = locks
            .acquire(5, Duration::from_secs(1), &cancel)
            .await
            .unwrap();

        let waiter = {
            let locks = locks.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { locks.acquire(5, Duration::from_secs(5), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        let second = waiter.await.unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_wait() {
        let locks = RowLocks::new();
        let cancel = CancellationToken::new();
        let _guard = locks
            .acquire(9, Duration::from_secs(1), &cancel)
            .await
            .unwrap();

        let waiter_cancel = CancellationToken::new();
        waiter_cancel.cancel();
        let err = locks
            .acquire(9, Duration::from_secs(5), &waiter_cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled(9)));
    }

    #[tokio::test]
    async fn test_entries_are_dropped_when_unused() {
        let locks = RowLocks::new();
        let cancel = CancellationToken::new();

        {
            let _a = locks.acquire(1, Duration::from_secs(1), &cancel).await.unwrap();
            let _b = locks.acquire(2, Duration::from_secs(1), &cancel).await.unwrap();
            assert_eq!(locks.len(), 2);
        }

        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_frozen_reports_held_rows_and_defers_acquire() {
        let locks = RowLocks::new();
        let cancel = CancellationToken::new();
        let held = locks.acquire(3, Duration::from_secs(1), &cancel).await.unwrap();

        let seen = locks
            .frozen(|is_locked| Ok((is_locked(3), is_locked(4))))
            .unwrap();
        assert_eq!(seen, (true, false));

        // An acquire that starts while frozen completes once the table thaws
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let frozen = {
            let locks = locks.clone();
            std::thread::spawn(move || {
                locks
                    .frozen(|_| {
                        entered_tx.send(()).unwrap();
                        std::thread::sleep(Duration::from_millis(50));
                        Ok(())
                    })
                    .unwrap();
            })
        };
        entered_rx.recv().unwrap();

        let started = std::time::Instant::now();
        let other = locks.acquire(4, Duration::from_secs(1), &cancel).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(other.id(), 4);

        frozen.join().unwrap();
        drop(held);
    }
}
