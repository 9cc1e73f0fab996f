//! Download task model
//!
//! A task is one unit of download work owned by a single account. Its status
//! moves through the claim/finalize protocol implemented in [`crate::engine`]:
//!
//! ```text
//! PENDING ──claim──▶ DOWNLOADING ──finalize──▶ SUCCESS | FAILED
//!    ▲                    │                                │
//!    └──── recovery sweep ┴────────────────────────────────┘ (FAILED only)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Metadata key holding the blob key of a downloaded payload
pub const METADATA_FILE_NAME: &str = "file-name";

/// Arbitrary string-keyed metadata attached to a successful task
pub type Metadata = Map<String, Value>;

/// Blob key under which the payload of task `id` is stored
pub fn file_key(id: u64) -> String {
    format!("download_file_{}", id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadType {
    Unspecified,
    Http,
}

impl fmt::Display for DownloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadType::Unspecified => f.write_str("unspecified"),
            DownloadType::Http => f.write_str("http"),
        }
    }
}

impl FromStr for DownloadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unspecified" => Ok(DownloadType::Unspecified),
            "http" => Ok(DownloadType::Http),
            other => Err(format!("unknown download type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Success,
    Failed,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Success => "success",
            DownloadStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Where a task's payload comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub download_type: DownloadType,
    pub url: String,
}

impl SourceDescriptor {
    pub fn new(download_type: DownloadType, url: impl Into<String>) -> Self {
        Self {
            download_type,
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub account_id: u64,
    #[serde(flatten)]
    pub source: SourceDescriptor,
    pub status: DownloadStatus,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set while the task is DOWNLOADING
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A fresh PENDING task; the id is assigned by the store on insert
    pub fn new(account_id: u64, source: SourceDescriptor) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            account_id,
            source,
            status: DownloadStatus::Pending,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            claimed_at: None,
        }
    }

    pub fn is_owned_by(&self, account_id: u64) -> bool {
        self.account_id == account_id
    }

    /// Blob key recorded on success, if any
    pub fn file_name(&self) -> Option<&str> {
        self.metadata.get(METADATA_FILE_NAME).and_then(Value::as_str)
    }

    pub fn mark_downloading(&mut self, now: DateTime<Utc>) {
        self.status = DownloadStatus::Downloading;
        self.claimed_at = Some(now);
        self.updated_at = now;
    }

    /// Records the downloader's metadata merged with the blob key
    pub fn mark_success(&mut self, mut metadata: Metadata, file_name: String) {
        metadata.insert(METADATA_FILE_NAME.to_string(), Value::String(file_name));
        self.status = DownloadStatus::Success;
        self.metadata = metadata;
        self.claimed_at = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self) {
        self.status = DownloadStatus::Failed;
        self.claimed_at = None;
        self.updated_at = Utc::now();
    }

    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.status = DownloadStatus::Pending;
        self.claimed_at = None;
        self.updated_at = now;
    }
}
