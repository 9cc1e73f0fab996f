use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::dispatcher::BatchDispatcher;
use super::sweep::RecoverySweep;
use crate::error::Result;

/// A unit of periodic work
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_once(&self, cancel: &CancellationToken) -> Result<()>;
}

#[async_trait]
impl ScheduledJob for RecoverySweep {
    fn name(&self) -> &'static str {
        "recovery_sweep"
    }

    async fn run_once(&self, _cancel: &CancellationToken) -> Result<()> {
        self.run().map(|_| ())
    }
}

#[async_trait]
impl ScheduledJob for BatchDispatcher {
    fn name(&self) -> &'static str {
        "dispatch_pending"
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<()> {
        self.run(cancel).await.map(|_| ())
    }
}

/// Run `job` now and then every `period` until `cancel` fires
///
/// Runs never overlap; ticks missed while a run is in progress are skipped.
pub fn spawn_periodic(
    job: Arc<dyn ScheduledJob>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(job = job.name(), period = ?period, "Scheduled job started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(job = job.name(), "Scheduled job shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = job.run_once(&cancel).await {
                        error!(job = job.name(), error = %e, "Scheduled job failed");
                    }
                }
            }
        }
    })
}
