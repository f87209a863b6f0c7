use crate::feed::parser::{parse_feed, FeedEntry};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while retrieving an upstream feed.
///
/// The scheduler treats every variant the same way: the current cycle is
/// skipped and the watermark is left untouched.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS, Atom or the expected JSON shape
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// Retrieves and normalizes a feed.
///
/// Implementations return entries in the order the upstream publishes them.
/// Callers assume newest-first, but nothing here verifies it.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, source_url: &str) -> Result<Vec<FeedEntry>, FetchError>;
}

/// [`FeedFetcher`] backed by plain HTTP GET requests.
#[derive(Clone)]
pub struct HttpFeedFetcher {
    client: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, source_url: &str) -> Result<Vec<FeedEntry>, FetchError> {
        let bytes = get_limited(&self.client, source_url, MAX_FEED_SIZE).await?;
        let entries = parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))?;
        tracing::debug!(url = %source_url, entries = entries.len(), "Fetched feed");
        Ok(entries)
    }
}

/// GETs `url` and returns the body, enforcing the timeout and a size cap.
pub(crate) async fn get_limited(
    client: &reqwest::Client,
    url: &str,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let response = tokio::time::timeout(
        REQUEST_TIMEOUT,
        client
            .get(url)
            .header(
                "Accept",
                "application/rss+xml, application/atom+xml, application/json, application/xml;q=0.9, text/xml;q=0.8",
            )
            .send(),
    )
    .await
    .map_err(|_| FetchError::Timeout)?
    .map_err(FetchError::Network)?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    read_limited_bytes(response, limit).await
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
