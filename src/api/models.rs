//! Request and response bodies of the task API
//!
//! Every request carries the caller's verified account id in the
//! `X-Account-Id` header.
//!
//! ```json
//! POST /tasks
//! { "download_type": "http", "url": "https://example.com/archive.zip" }
//! ```
//!
//! Responses embed the task as stored, with timestamps in RFC 3339.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::observability::MetricsSnapshot;
use crate::store::StoreStats;
use crate::task::{DownloadStatus, DownloadType, Metadata, Task};

#[derive(Debug, Deserialize, Clone)]
pub struct CreateTaskRequest {
    pub download_type: DownloadType,
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpdateTaskRequest {
    pub url: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskResponse {
    pub id: u64,
    pub account_id: u64,
    pub download_type: DownloadType,
    pub url: String,
    pub status: DownloadStatus,
    pub metadata: Metadata,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            account_id: task.account_id,
            download_type: task.source.download_type,
            url: task.source.url,
            status: task.status,
            metadata: task.metadata,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskResponse>,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
    pub tasks: Option<StoreStats>,
    pub metrics: MetricsSnapshot,
}
