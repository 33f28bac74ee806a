//! Byte transport for remote documents.
//!
//! A [`DocumentTransport`] resolves a locator and streams its bytes, exposing
//! the total size when the server announces one so the renderer can report
//! load progress.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, instrument};

use crate::LoadError;

/// A document body being streamed.
pub struct ByteStream {
    /// Total size in bytes, when known up front.
    pub total: Option<u64>,
    /// Body chunks in order.
    pub chunks: BoxStream<'static, Result<Vec<u8>, LoadError>>,
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Fetches document bytes by locator.
#[async_trait]
pub trait DocumentTransport: Send + Sync {
    /// Starts fetching `locator`.
    async fn fetch(&self, locator: &str) -> Result<ByteStream, LoadError>;
}

/// HTTP transport backed by reqwest.
///
/// Server-relative locators such as `/uploads/lesson-3.pdf` are resolved
/// against the configured base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Creates a transport that only accepts absolute locators.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: None,
        }
    }

    /// Sets the base URL used for server-relative locators.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Turns a locator into an absolute URL.
    pub fn resolve(&self, locator: &str) -> Result<String, LoadError> {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return Ok(locator.to_string());
        }
        match (&self.base_url, locator.starts_with('/')) {
            (Some(base), true) => Ok(format!("{}{locator}", base.trim_end_matches('/'))),
            _ => Err(LoadError::unreachable(
                locator,
                "relative locator and no base URL configured",
            )),
        }
    }
}

#[async_trait]
impl DocumentTransport for HttpTransport {
    #[instrument(skip(self))]
    async fn fetch(&self, locator: &str) -> Result<ByteStream, LoadError> {
        let url = self.resolve(locator)?;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LoadError::unreachable(&url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }

        let total = response.content_length().filter(|len| *len > 0);
        debug!(url = %url, total = ?total, "Document response received");

        let chunks = response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| LoadError::unreachable(&url, e.to_string()))
            })
            .boxed();

        Ok(ByteStream { total, chunks })
    }
}

/// In-memory transport serving registered documents in fixed-size chunks.
///
/// Useful for previews, offline fixtures and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    documents: HashMap<String, Vec<u8>>,
    chunk_size: usize,
    announce_total: bool,
}

impl MemoryTransport {
    /// Creates an empty transport that announces totals and serves 16 KiB chunks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            documents: HashMap::new(),
            chunk_size: 16 * 1024,
            announce_total: true,
        }
    }

    /// Registers a document under `locator`.
    #[must_use]
    pub fn with_document(mut self, locator: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.documents.insert(locator.into(), bytes);
        self
    }

    /// Sets the chunk size (minimum one byte).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Controls whether the total size is announced.
    #[must_use]
    pub const fn with_announced_total(mut self, announce: bool) -> Self {
        self.announce_total = announce;
        self
    }
}

#[async_trait]
impl DocumentTransport for MemoryTransport {
    async fn fetch(&self, locator: &str) -> Result<ByteStream, LoadError> {
        let bytes = self
            .documents
            .get(locator)
            .ok_or_else(|| LoadError::HttpStatus {
                url: locator.to_string(),
                status: 404,
            })?;

        let total = self
            .announce_total
            .then(|| u64::try_from(bytes.len()).ok())
            .flatten();
        let chunks: Vec<Result<Vec<u8>, LoadError>> = bytes
            .chunks(self.chunk_size.max(1))
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();

        Ok(ByteStream {
            total,
            chunks: stream::iter(chunks).boxed(),
        })
    }
}
