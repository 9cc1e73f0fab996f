use std::collections::BTreeMap;
use std::sync::Arc;

use super::{DownloadError, Downloader, HttpConfig, HttpDownloader, Result};
use crate::task::DownloadType;

/// Maps download types to their strategy
#[derive(Clone, Default)]
pub struct DownloaderRegistry {
    downloaders: BTreeMap<DownloadType, Arc<dyn Downloader>>,
}

impl DownloaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the strategy for `download_type`
    pub fn register(&mut self, download_type: DownloadType, downloader: Arc<dyn Downloader>) {
        self.downloaders.insert(download_type, downloader);
    }

    pub fn get(&self, download_type: DownloadType) -> Result<Arc<dyn Downloader>> {
        self.downloaders
            .get(&download_type)
            .cloned()
            .ok_or(DownloadError::UnsupportedType(download_type))
    }

    pub fn supports(&self, download_type: DownloadType) -> bool {
        self.downloaders.contains_key(&download_type)
    }

    /// Registry with the built-in HTTP downloader
    pub fn with_defaults(http: HttpConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(DownloadType::Http, Arc::new(HttpDownloader::new(http)?));
        Ok(registry)
    }
}
