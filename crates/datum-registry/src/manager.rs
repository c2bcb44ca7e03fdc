//! Version chain manager
//!
//! Builds releases on top of the current tip and commits them through the
//! index with optimistic concurrency. Each attempt reads the tip, validates
//! the declared version against it, and commits with append-if-tip-matches.
//! A lost race re-reads and tries again with backoff; once the policy is
//! exhausted the caller sees `ConcurrentModification`.

use std::sync::Arc;

use datum_core::{DatumError, Fingerprint, Identifier, Release, ReleaseMetadata, Result, RetryPolicy};
use datum_journal::VersionChain;
use datum_store::AppendOutcome;
use tracing::{debug, warn};

use crate::index::RegistryIndex;

/// Appends, retracts and verifies chains homed at this registry
#[derive(Debug, Clone)]
pub struct ChainManager {
    index: Arc<RegistryIndex>,
    retry: RetryPolicy,
}

impl ChainManager {
    /// Manager over `index` with the default append retry policy
    pub fn new(index: Arc<RegistryIndex>) -> Self {
        Self {
            index,
            retry: RetryPolicy::exponential()
                .with_max_retries(5)
                .with_initial_delay(std::time::Duration::from_millis(5))
                .with_max_delay(std::time::Duration::from_millis(200))
                .with_jitter(),
        }
    }

    /// Replace the retry policy for lost append races
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Index the manager writes through
    pub fn index(&self) -> &Arc<RegistryIndex> {
        &self.index
    }

    /// Append a publication at `version`
    ///
    /// Fails with `VersionConflict` unless `version` is greater than the tip.
    pub async fn append(
        &self,
        identifier: &Identifier,
        version: u64,
        fingerprint: Fingerprint,
        origin_url: &str,
        metadata: ReleaseMetadata,
    ) -> Result<Release> {
        self.commit(identifier, version, |chain, now| {
            chain.prepare_publication(version, fingerprint.clone(), origin_url, metadata.clone(), now)
        })
        .await
    }

    /// Append a tombstone retracting `version`
    ///
    /// The tombstone takes the next version number and carries the retracted
    /// release's fingerprint. Nothing is removed.
    pub async fn retract(&self, identifier: &Identifier, version: u64, reason: &str) -> Result<Release> {
        self.commit(identifier, version, |chain, now| chain.prepare_retraction(version, reason, now))
            .await
    }

    /// Walk the stored chain, flagging the record if any link fails
    pub async fn verify_chain(&self, identifier: &Identifier) -> Result<()> {
        self.index.verify_record(identifier).await
    }

    async fn commit<F>(&self, identifier: &Identifier, declared: u64, build: F) -> Result<Release>
    where
        F: Fn(&VersionChain, chrono::DateTime<chrono::Utc>) -> Result<Release>,
    {
        let build = &build;
        let outcome = self
            .retry
            .execute(
                |attempt| async move {
                    let record = self.index.writable_record(identifier, declared).await?;
                    let release = build(&record.chain, self.index.clock().now())?;
                    match self.index.try_publish(release.clone()).await? {
                        AppendOutcome::Appended => Ok(release),
                        AppendOutcome::TipMismatch { current } => {
                            debug!(identifier = %identifier, attempt, current = ?current, "append lost race, retrying");
                            Err(DatumError::concurrent_modification(identifier, attempt + 1))
                        }
                    }
                },
                |e: &DatumError| matches!(e, DatumError::ConcurrentModification { .. }),
            )
            .await;

        match outcome.result {
            Err(DatumError::ConcurrentModification { .. }) => {
                warn!(identifier = %identifier, attempts = outcome.attempts, "append abandoned after repeated races");
                Err(DatumError::concurrent_modification(identifier, outcome.attempts))
            }
            other => other,
        }
    }
}
