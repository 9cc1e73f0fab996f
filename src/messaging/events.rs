use serde::{Deserialize, Serialize};

use super::Result;

/// Topic carrying [`DownloadTaskCreated`] events
pub const TOPIC_DOWNLOAD_TASK_CREATED: &str = "download_task_created";

/// Published once per created task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTaskCreated {
    pub id: u64,
}

impl DownloadTaskCreated {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}
