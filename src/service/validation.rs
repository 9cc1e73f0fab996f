use crate::downloader::http::parse_http_url;
use crate::error::{Result, TaskError};
use crate::task::DownloadType;

/// Largest page a list request may ask for
pub const MAX_PAGE_LIMIT: usize = 100;

/// Page size used when the caller passes 0
pub const DEFAULT_PAGE_LIMIT: usize = 10;

pub const MAX_URL_LEN: usize = 2048;

/// Reject URLs the downloader for `download_type` could never fetch
pub fn validate_source_url(download_type: DownloadType, url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(TaskError::InvalidArgument("url must not be empty".to_string()));
    }
    if url.len() > MAX_URL_LEN {
        return Err(TaskError::InvalidArgument(format!(
            "url exceeds {} characters",
            MAX_URL_LEN
        )));
    }

    match download_type {
        DownloadType::Http => parse_http_url(url)
            .map(|_| ())
            .map_err(|e| TaskError::InvalidArgument(e.to_string())),
        DownloadType::Unspecified => Err(TaskError::InvalidArgument(
            "download_type must be specified".to_string(),
        )),
    }
}

/// Clamp a requested page size into `1..=MAX_PAGE_LIMIT`
pub fn page_limit(requested: usize) -> usize {
    match requested {
        0 => DEFAULT_PAGE_LIMIT,
        n => n.min(MAX_PAGE_LIMIT),
    }
}
