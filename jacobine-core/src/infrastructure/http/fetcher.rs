//! HTTP fetcher used by the producer (buffered feeds) and the download
//! stage (archive streaming).
//!
//! TLS peer verification is disabled: the fetcher only talks to the
//! project's own release hosts, and callers verify artifact integrity via
//! the work record's MD5/SHA1 checksums after download, not via transport.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// HTTP failures, including post-download integrity failures.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("writing download to {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("downloaded file {path} missing on disk")]
    Missing { path: PathBuf },

    #[error("{algorithm} mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        algorithm: &'static str,
        expected: String,
        actual: String,
    },
}

/// Response of a buffered GET.
#[derive(Debug)]
pub struct FetchedBody {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Shared HTTP client; timeouts are passed per call.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }

    /// Buffered GET for small payloads such as JSON release feeds.
    pub async fn get(&self, url: &str, timeout: Duration) -> Result<FetchedBody, FetchError> {
        debug!(url, ?timeout, "Fetching");
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| request_error(url, e))?
            .to_vec();

        Ok(FetchedBody {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    /// Stream a URL to a file on disk. Returns the number of bytes written
    /// after verifying the file exists.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<u64, FetchError> {
        info!(url, dest = %dest.display(), "Starting download");

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let io_error = |source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::create(dest).await.map_err(io_error)?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| request_error(url, e))?;
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_error)?;
        drop(file);

        if tokio::fs::metadata(dest).await.is_err() {
            return Err(FetchError::Missing {
                path: dest.to_path_buf(),
            });
        }

        info!(url, bytes = written, "Download finished");
        Ok(written)
    }
}

fn request_error(url: &str, source: reqwest::Error) -> FetchError {
    if source.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Request {
            url: url.to_string(),
            source,
        }
    }
}
