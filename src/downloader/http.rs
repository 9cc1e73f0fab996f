//! HTTP(S) downloader

use futures::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{DownloadError, Downloader, Result};
use crate::config::DownloadConfig;
use crate::storage::BlobWriter;
use crate::task::{Metadata, SourceDescriptor};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub max_file_bytes: Option<u64>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            user_agent: format!("fetchtask/{}", env!("CARGO_PKG_VERSION")),
            max_file_bytes: None,
        }
    }
}

impl From<&DownloadConfig> for HttpConfig {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout.0,
            request_timeout: config.request_timeout.0,
            user_agent: config.user_agent.clone(),
            max_file_bytes: config.max_file_bytes.map(|size| size.as_u64()),
        }
    }
}

/// Parse and check that `raw` is an absolute http(s) URL
pub fn parse_http_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        "http" | "https" => Err(DownloadError::InvalidUrl(format!("{}: missing host", raw))),
        scheme => Err(DownloadError::InvalidUrl(format!(
            "{}: unsupported scheme '{}'",
            raw, scheme
        ))),
    }
}

/// Streams a GET response body into the sink
///
/// One request per call. Failures are reported, never retried here; the
/// recovery sweep requeues failed tasks.
pub struct HttpDownloader {
    client: Client,
    config: HttpConfig,
}

impl HttpDownloader {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| DownloadError::RequestFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn check_size(&self, size: u64) -> Result<()> {
        match self.config.max_file_bytes {
            Some(limit) if size > limit => Err(DownloadError::TooLarge { limit }),
            _ => Ok(()),
        }
    }
}

fn classify(e: reqwest::Error) -> DownloadError {
    if e.is_timeout() {
        DownloadError::Timeout
    } else if e.is_redirect() {
        DownloadError::TooManyRedirects
    } else {
        DownloadError::RequestFailed(e.to_string())
    }
}

#[async_trait::async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        source: &SourceDescriptor,
        sink: &mut BlobWriter,
        cancel: &CancellationToken,
    ) -> Result<Metadata> {
        let url = parse_http_url(&source.url)?;
        debug!(url = %url, key = sink.key(), "Starting download");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = self.client.get(url.clone()).send() => response.map_err(classify)?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::RequestFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        if let Some(length) = response.content_length() {
            self.check_size(length)?;
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut body = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(classify)?;

            self.check_size(sink.bytes_written() + chunk.len() as u64)?;
            sink.write(chunk).await?;
        }

        debug!(url = %url, size = sink.bytes_written(), "Download completed");

        let mut metadata = Metadata::new();
        metadata.insert("url".to_string(), Value::String(url.to_string()));
        metadata.insert("size".to_string(), Value::from(sink.bytes_written()));
        if let Some(content_type) = content_type {
            metadata.insert("content-type".to_string(), Value::String(content_type));
        }
        Ok(metadata)
    }
}
