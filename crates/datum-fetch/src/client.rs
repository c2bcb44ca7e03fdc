//! Fetch & verify client

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use datum_core::config::FetchSection;
use datum_core::fingerprint::StreamingFingerprint;
use datum_core::{DatumError, DigestAlgorithm, Fingerprint, Identifier, Release, Result, RetryPolicy};
use futures::StreamExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::origin::{OriginSource, SchemeRouter};

/// Bytes confirmed to match a release's fingerprint
///
/// Only [`FetchClient::fetch_and_verify`] constructs this, so holding one is
/// proof of verification.
#[derive(Debug, Clone)]
pub struct VerifiedContent {
    identifier: Identifier,
    version: u64,
    fingerprint: Fingerprint,
    bytes: Bytes,
}

impl VerifiedContent {
    /// Identifier of the verified release
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Version of the verified release
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Fingerprint the bytes matched
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Content
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Take the content
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Digest of origin content that was streamed and not retained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDigest {
    /// Fingerprint of the content
    pub fingerprint: Fingerprint,
    /// Number of bytes read
    pub size: u64,
}

struct Download {
    fingerprint: Fingerprint,
    size: u64,
    bytes: Option<Bytes>,
}

/// Retrieves origin content with retry, deadline and size limits
#[derive(Clone)]
pub struct FetchClient {
    origin: Arc<dyn OriginSource>,
    retry: RetryPolicy,
    max_bytes: Option<u64>,
    default_deadline: Duration,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("retry", &self.retry)
            .field("max_bytes", &self.max_bytes)
            .field("default_deadline", &self.default_deadline)
            .finish_non_exhaustive()
    }
}

impl FetchClient {
    /// Client over `origin` with default retry and a two-minute deadline
    pub fn new(origin: Arc<dyn OriginSource>) -> Self {
        Self {
            origin,
            retry: RetryPolicy::exponential().with_jitter(),
            max_bytes: None,
            default_deadline: Duration::from_secs(120),
        }
    }

    /// Client with the standard schemes and settings from configuration
    pub fn from_config(config: &FetchSection) -> Result<Self> {
        let router = SchemeRouter::standard(&config.user_agent)?;
        Ok(Self::new(Arc::new(router))
            .with_retry(config.retry.clone())
            .with_max_bytes(config.max_content_bytes)
            .with_deadline(config.timeout()))
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Abort downloads larger than `max_bytes`
    pub fn with_max_bytes(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Deadline used when the caller supplies none
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Retrieve a release's content and confirm it matches the recorded fingerprint
    ///
    /// Transient failures are retried within the deadline. A mismatch is an
    /// `IntegrityViolation` and is never retried. On timeout nothing
    /// downloaded so far is returned.
    pub async fn fetch_and_verify(&self, release: &Release, deadline: Option<Duration>) -> Result<VerifiedContent> {
        let url = parse_origin(&release.origin_url)?;
        let expected = &release.fingerprint;
        let download = self.download(&url, expected.algorithm(), true, deadline).await?;

        if download.fingerprint != *expected {
            warn!(
                identifier = %release.identifier,
                version = release.version,
                url = %url,
                expected = %expected,
                actual = %download.fingerprint,
                "origin content does not match recorded fingerprint"
            );
            return Err(DatumError::integrity_violation(url.as_str(), expected, &download.fingerprint));
        }

        info!(
            identifier = %release.identifier,
            version = release.version,
            size = download.size,
            "origin content verified"
        );
        Ok(VerifiedContent {
            identifier: release.identifier.clone(),
            version: release.version,
            fingerprint: download.fingerprint,
            bytes: download.bytes.unwrap_or_default(),
        })
    }

    /// Stream the content at `url` through the fingerprint engine without keeping it
    pub async fn fingerprint_origin(
        &self,
        origin_url: &str,
        algorithm: DigestAlgorithm,
        deadline: Option<Duration>,
    ) -> Result<FetchedDigest> {
        let url = parse_origin(origin_url)?;
        let download = self.download(&url, algorithm, false, deadline).await?;
        Ok(FetchedDigest {
            fingerprint: download.fingerprint,
            size: download.size,
        })
    }

    async fn download(
        &self,
        url: &Url,
        algorithm: DigestAlgorithm,
        keep: bool,
        deadline: Option<Duration>,
    ) -> Result<Download> {
        let deadline = deadline.unwrap_or(self.default_deadline);
        let attempts = self.retry.execute(
            |attempt| {
                if attempt > 0 {
                    debug!(url = %url, attempt, "retrying origin fetch");
                }
                self.attempt(url, algorithm, keep)
            },
            DatumError::is_retryable,
        );

        match tokio::time::timeout(deadline, attempts).await {
            Ok(outcome) => {
                if let Err(e) = &outcome.result {
                    warn!(url = %url, attempts = outcome.attempts, error = %e, "origin fetch failed");
                }
                outcome.result
            }
            Err(_) => Err(DatumError::fetch_transient(
                url.as_str(),
                format!("deadline of {}ms exceeded", deadline.as_millis()),
            )),
        }
    }

    async fn attempt(&self, url: &Url, algorithm: DigestAlgorithm, keep: bool) -> Result<Download> {
        let mut stream = self.origin.open(url).await?;
        let mut hasher = StreamingFingerprint::new(algorithm);
        let mut buffer = keep.then(BytesMut::new);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            if let Some(limit) = self.max_bytes {
                if hasher.bytes_seen() > limit {
                    return Err(DatumError::fetch_permanent(
                        url.as_str(),
                        format!("content exceeds the {limit}-byte limit"),
                    ));
                }
            }
            if let Some(buffer) = buffer.as_mut() {
                buffer.extend_from_slice(&chunk);
            }
        }

        let size = hasher.bytes_seen();
        Ok(Download {
            fingerprint: hasher.finish(),
            size,
            bytes: buffer.map(BytesMut::freeze),
        })
    }
}

fn parse_origin(origin_url: &str) -> Result<Url> {
    Url::parse(origin_url).map_err(|e| DatumError::fetch_permanent(origin_url, format!("malformed origin URL: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_url_is_permanent() {
        let err = parse_origin("not a url").unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "fetch_error");
    }
}
