use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::observability::Metrics;
use crate::store::TaskStore;

/// Returns DOWNLOADING and FAILED tasks to PENDING
///
/// Without a staleness threshold every DOWNLOADING task is requeued, which
/// is only safe when no executor is mid-download. With `stale_after` set,
/// tasks claimed more recently than that are left alone. FAILED tasks are
/// always requeued.
pub struct RecoverySweep {
    store: Arc<TaskStore>,
    metrics: Arc<Metrics>,
    stale_after: Option<Duration>,
}

impl RecoverySweep {
    pub fn new(store: Arc<TaskStore>, metrics: Arc<Metrics>, stale_after: Option<Duration>) -> Self {
        Self {
            store,
            metrics,
            stale_after,
        }
    }

    /// Run one sweep and return how many tasks were requeued
    pub fn run(&self) -> Result<usize> {
        let cutoff = self.stale_after.map(|age| claimed_before(Utc::now(), age));
        let requeued = self.store.reset_to_pending(cutoff)?;

        if requeued > 0 {
            self.metrics.tasks_requeued(requeued);
        }
        info!(requeued, "Recovery sweep finished");
        Ok(requeued)
    }
}

fn claimed_before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::DownloadStatus;
    use crate::test_support::TestHarness;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_no_stuck_tasks_after_sweep() {
        let harness = TestHarness::failing();
        let cancel = CancellationToken::new();

        let failed = harness.create_http_task(1, "http://x/y");
        let _ = harness.executor.execute(failed, &cancel).await;
        let stuck = harness.create_http_task(1, "http://x/y");
        harness.executor.claim(stuck, &cancel).await.unwrap();
        harness.create_http_task(1, "http://x/y");

        let sweep = RecoverySweep::new(harness.store.clone(), harness.metrics.clone(), None);
        assert_eq!(sweep.run().unwrap(), 2);

        let stats = harness.store.stats().unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.downloading + stats.failed, 0);
        assert_eq!(harness.metrics.snapshot().tasks_requeued, 2);

        assert_eq!(sweep.run().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_threshold_spares_fresh_claims() {
        let harness = TestHarness::new();
        let id = harness.create_http_task(1, "http://x/y");
        harness
            .executor
            .claim(id, &CancellationToken::new())
            .await
            .unwrap();

        let sweep = RecoverySweep::new(
            harness.store.clone(),
            harness.metrics.clone(),
            Some(Duration::from_secs(3600)),
        );
        assert_eq!(sweep.run().unwrap(), 0);
        assert_eq!(harness.store.get(id).unwrap().status, DownloadStatus::Downloading);
    }

    #[test]
    fn test_claimed_before_saturates() {
        let now = Utc::now();
        assert_eq!(claimed_before(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            claimed_before(now, Duration::from_secs(60)),
            now - TimeDelta::seconds(60)
        );
    }
}
