use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::{ExecutionOutcome, TaskExecutor};
use crate::error::{Result, TaskError};
use crate::store::TaskStore;

/// Tally of one dispatch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub total: usize,
    pub completed: usize,
    pub not_claimed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl DispatchStats {
    fn merge(&mut self, other: DispatchStats) {
        self.completed += other.completed;
        self.not_claimed += other.not_claimed;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }
}

/// Executes every PENDING task on a bounded worker pool
///
/// Each run owns its pool: `concurrency_limit` workers pull ids from a
/// bounded queue and the run returns only after all of them have exited.
pub struct BatchDispatcher {
    store: Arc<TaskStore>,
    executor: Arc<TaskExecutor>,
    concurrency_limit: usize,
}

impl BatchDispatcher {
    pub fn new(store: Arc<TaskStore>, executor: Arc<TaskExecutor>, concurrency_limit: usize) -> Self {
        Self {
            store,
            executor,
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<DispatchStats> {
        let ids = self.store.list_pending_ids()?;
        let mut stats = DispatchStats {
            total: ids.len(),
            ..DispatchStats::default()
        };

        if ids.is_empty() {
            debug!("No pending tasks to dispatch");
            return Ok(stats);
        }

        let workers = self.concurrency_limit.min(ids.len());
        info!(pending = ids.len(), workers, "Dispatching pending tasks");

        let (tx, rx) = mpsc::channel::<u64>(workers);
        let rx = Arc::new(Mutex::new(rx));

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            pool.spawn(worker_loop(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&self.executor),
                cancel.clone(),
            ));
        }

        let mut sent = 0;
        for &id in &ids {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                queued = tx.send(id) => queued.is_ok(),
            };
            if !accepted {
                break;
            }
            sent += 1;
        }
        drop(tx);

        // Ids never handed to a worker count as cancelled
        stats.cancelled += ids.len() - sent;

        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(worker_stats) => stats.merge(worker_stats),
                Err(e) => error!(error = %e, "Dispatch worker panicked"),
            }
        }

        info!(
            total = stats.total,
            completed = stats.completed,
            not_claimed = stats.not_claimed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "Dispatch finished"
        );
        Ok(stats)
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<u64>>>,
    executor: Arc<TaskExecutor>,
    cancel: CancellationToken,
) -> DispatchStats {
    let mut stats = DispatchStats::default();

    loop {
        let next = queue.lock().await.recv().await;
        let Some(id) = next else { break };

        if cancel.is_cancelled() {
            stats.cancelled += 1;
            continue;
        }

        match executor.execute(id, &cancel).await {
            Ok(ExecutionOutcome::Completed(_)) => stats.completed += 1,
            Ok(ExecutionOutcome::NotClaimed(status)) => {
                debug!(worker_id, task_id = id, %status, "Task already taken");
                stats.not_claimed += 1;
            }
            Err(TaskError::Cancelled) => stats.cancelled += 1,
            Err(e) => {
                warn!(worker_id, task_id = id, error = %e, "Dispatched task failed");
                stats.failed += 1;
            }
        }
    }

    stats
}
