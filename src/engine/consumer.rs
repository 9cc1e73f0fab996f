use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::executor::{ExecutionOutcome, TaskExecutor};
use crate::error::TaskError;
use crate::messaging::{DownloadTaskCreated, HandlerError, MessageHandler};

/// Executes the task named by each `download_task_created` event
///
/// Redelivered or duplicate events are harmless: the claim step turns them
/// into no-ops once the task has left PENDING.
pub struct DownloadTaskCreatedHandler {
    executor: Arc<TaskExecutor>,
    cancel: CancellationToken,
}

impl DownloadTaskCreatedHandler {
    pub fn new(executor: Arc<TaskExecutor>, cancel: CancellationToken) -> Self {
        Self { executor, cancel }
    }
}

#[async_trait]
impl MessageHandler for DownloadTaskCreatedHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) -> Result<(), HandlerError> {
        let event = match DownloadTaskCreated::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                // Retrying cannot fix a malformed payload
                error!(topic, error = %e, "Dropping malformed event");
                return Ok(());
            }
        };

        match self.executor.execute(event.id, &self.cancel).await {
            Ok(ExecutionOutcome::Completed(_)) => Ok(()),
            Ok(ExecutionOutcome::NotClaimed(status)) => {
                debug!(task_id = event.id, %status, "Event for task no longer pending");
                Ok(())
            }
            Err(TaskError::NotFound(id)) => {
                debug!(task_id = id, "Event for deleted task");
                Ok(())
            }
            Err(e @ (TaskError::LockTimeout(_) | TaskError::Store(_))) => {
                // The claim did not happen; ask for redelivery
                warn!(task_id = event.id, error = %e, "Claim failed");
                Err(e.into())
            }
            // Download errors are already recorded as FAILED, and a
            // cancelled task is left for the recovery sweep
            Err(_) => Ok(()),
        }
    }
}
