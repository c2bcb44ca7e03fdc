//! Origin sources
//!
//! An origin yields the bytes behind a URL as a stream of chunks. Errors are
//! reported as `FetchError` with the retryable bit set for transient causes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use datum_core::{DatumError, Result};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio_util::io::ReaderStream;
use url::Url;

/// Chunks of origin content
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Something that can open a URL for reading
#[async_trait]
pub trait OriginSource: Send + Sync {
    /// Start reading the content behind `url`
    async fn open(&self, url: &Url) -> Result<ByteStream>;
}

/// Dispatches by URL scheme
#[derive(Clone, Default)]
pub struct SchemeRouter {
    routes: HashMap<String, Arc<dyn OriginSource>>,
}

impl SchemeRouter {
    /// Router with no schemes
    pub fn new() -> Self {
        Self::default()
    }

    /// `http`, `https` and `file`
    pub fn standard(user_agent: &str) -> Result<Self> {
        let http: Arc<dyn OriginSource> = Arc::new(HttpOrigin::new(user_agent)?);
        Ok(Self::new()
            .route("http", http.clone())
            .route("https", http)
            .route("file", Arc::new(FileOrigin)))
    }

    /// Serve `scheme` with `source`
    pub fn route(mut self, scheme: &str, source: Arc<dyn OriginSource>) -> Self {
        self.routes.insert(scheme.to_ascii_lowercase(), source);
        self
    }
}

#[async_trait]
impl OriginSource for SchemeRouter {
    async fn open(&self, url: &Url) -> Result<ByteStream> {
        match self.routes.get(url.scheme()) {
            Some(source) => source.open(url).await,
            None => Err(DatumError::fetch_permanent(
                url.as_str(),
                format!("unsupported scheme '{}'", url.scheme()),
            )),
        }
    }
}

/// Whether an HTTP status is worth retrying
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT
}

/// HTTP(S) origin backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    client: reqwest::Client,
}

impl HttpOrigin {
    /// Build a client that identifies itself with `user_agent`
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| DatumError::config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn request_error(url: &Url, err: &reqwest::Error) -> DatumError {
        if err.is_builder() {
            DatumError::fetch_permanent(url.as_str(), format!("invalid request: {err}"))
        } else {
            DatumError::fetch_transient(url.as_str(), err.to_string())
        }
    }
}

#[async_trait]
impl OriginSource for HttpOrigin {
    async fn open(&self, url: &Url) -> Result<ByteStream> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Self::request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("origin answered {status}");
            return Err(if is_retryable_status(status) {
                DatumError::fetch_transient(url.as_str(), message)
            } else {
                DatumError::fetch_permanent(url.as_str(), message)
            });
        }

        tracing::debug!(url = %url, content_length = ?response.content_length(), "origin responded");
        let source = url.to_string();
        Ok(response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| DatumError::fetch_transient(source.clone(), e.to_string())))
            .boxed())
    }
}

/// Local files addressed by `file://` URLs
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOrigin;

#[async_trait]
impl OriginSource for FileOrigin {
    async fn open(&self, url: &Url) -> Result<ByteStream> {
        let path = url
            .to_file_path()
            .map_err(|()| DatumError::fetch_permanent(url.as_str(), "not a local file path"))?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                DatumError::fetch_permanent(url.as_str(), e.to_string())
            }
            _ => DatumError::fetch_transient(url.as_str(), e.to_string()),
        })?;
        let source = url.to_string();
        Ok(ReaderStream::new(file)
            .map(move |chunk| chunk.map_err(|e| DatumError::fetch_transient(source.clone(), e.to_string())))
            .boxed())
    }
}

/// Failure injected by [`MemoryOrigin`] on the next open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Retryable error before any bytes
    Transient,
    /// Permanent error before any bytes
    Permanent,
    /// Deliver half the content, then a retryable error
    Truncated,
    /// Never deliver anything
    Stall,
}

#[derive(Debug, Default)]
struct MemoryEntry {
    content: Bytes,
    failures: VecDeque<ScriptedFailure>,
    opens: usize,
}

/// In-process origin with scripted failures
#[derive(Debug)]
pub struct MemoryOrigin {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    chunk_size: usize,
}

impl MemoryOrigin {
    /// Empty origin delivering content in 4 KiB chunks
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            chunk_size: 4096,
        }
    }

    /// Serve `content` at `url`, replacing whatever was there
    pub fn serve(&self, url: &str, content: impl Into<Bytes>) {
        self.entries.lock().entry(url.to_string()).or_default().content = content.into();
    }

    /// Make the next open of `url` fail as described
    pub fn fail_next(&self, url: &str, failure: ScriptedFailure) {
        self.entries
            .lock()
            .entry(url.to_string())
            .or_default()
            .failures
            .push_back(failure);
    }

    /// How many times `url` has been opened
    pub fn opens(&self, url: &str) -> usize {
        self.entries.lock().get(url).map_or(0, |e| e.opens)
    }
}

impl Default for MemoryOrigin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OriginSource for MemoryOrigin {
    async fn open(&self, url: &Url) -> Result<ByteStream> {
        let (content, failure) = {
            let mut entries = self.entries.lock();
            let entry = entries
                .get_mut(url.as_str())
                .ok_or_else(|| DatumError::fetch_permanent(url.as_str(), "origin answered 404 Not Found"))?;
            entry.opens += 1;
            (entry.content.clone(), entry.failures.pop_front())
        };

        let source = url.to_string();
        let chunk_size = self.chunk_size;
        let chunks = |bytes: Bytes| -> Vec<Result<Bytes>> {
            (0..bytes.len())
                .step_by(chunk_size)
                .map(|start| Ok(bytes.slice(start..(start + chunk_size).min(bytes.len()))))
                .collect()
        };

        match failure {
            None => Ok(stream::iter(chunks(content)).boxed()),
            Some(ScriptedFailure::Transient) => Err(DatumError::fetch_transient(source, "connection reset")),
            Some(ScriptedFailure::Permanent) => Err(DatumError::fetch_permanent(source, "origin answered 410 Gone")),
            Some(ScriptedFailure::Stall) => Ok(stream::pending::<Result<Bytes>>().boxed()),
            Some(ScriptedFailure::Truncated) => {
                let half = content.slice(..content.len() / 2);
                let mut parts = chunks(half);
                parts.push(Err(DatumError::fetch_transient(source, "connection closed mid-body")));
                Ok(stream::iter(parts).boxed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::TryStreamExt;

    #[test]
    fn test_status_classification() {
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn test_router_rejects_unknown_scheme() {
        let router = SchemeRouter::new().route("file", Arc::new(FileOrigin));
        let url = Url::parse("ftp://mirror.example/data.csv").unwrap();
        let err = router.open(&url).await.err().unwrap();
        assert_matches!(err, DatumError::FetchError { retryable: false, .. });
    }

    #[tokio::test]
    async fn test_file_origin_streams_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, b"a,b\n1,2\n").unwrap();
        let url = Url::from_file_path(&path).unwrap();

        let chunks: Vec<Bytes> = FileOrigin.open(&url).await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_missing_file_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("absent.csv")).unwrap();
        let err = FileOrigin.open(&url).await.err().unwrap();
        assert_matches!(err, DatumError::FetchError { retryable: false, .. });
    }

    #[tokio::test]
    async fn test_memory_origin_chunks_and_counts() {
        let origin = MemoryOrigin::new();
        origin.serve("mem://x", vec![7u8; 10_000]);
        let url = Url::parse("mem://x").unwrap();
        let chunks: Vec<Bytes> = origin.open(&url).await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat().len(), 10_000);
        assert_eq!(origin.opens("mem://x"), 1);
    }
}
