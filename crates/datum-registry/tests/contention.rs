//! Optimistic appends that keep losing the race

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use datum_core::fingerprint::fingerprint;
use datum_core::{ChainHash, DatumError, Identifier, RegistryId, Release, ReleaseMetadata, Result, RetryPolicy};
use datum_journal::RegistryRecord;
use datum_registry::{ChainManager, RegistryIndex};
use datum_store::{AppendOutcome, MemoryRecordStore, RecordStore, RecordUpdate};

/// Store whose tip always appears to have moved by the time an append commits
#[derive(Debug, Default)]
struct ContendedStore {
    inner: MemoryRecordStore,
    appends: AtomicU32,
}

#[async_trait]
impl RecordStore for ContendedStore {
    async fn load(&self, identifier: &Identifier) -> Result<Option<RegistryRecord>> {
        self.inner.load(identifier).await
    }

    async fn create(&self, record: RegistryRecord) -> Result<()> {
        self.inner.create(record).await
    }

    async fn append_if_tip_matches(
        &self,
        _identifier: &Identifier,
        _expected_tip: Option<ChainHash>,
        _release: Release,
    ) -> Result<AppendOutcome> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(AppendOutcome::TipMismatch {
            current: Some(ChainHash([7; 32])),
        })
    }

    async fn update(&self, identifier: &Identifier, update: RecordUpdate) -> Result<RegistryRecord> {
        self.inner.update(identifier, update).await
    }

    async fn identifiers(&self) -> Result<Vec<Identifier>> {
        self.inner.identifiers().await
    }

    fn backend(&self) -> &'static str {
        "contended"
    }
}

#[tokio::test]
async fn exhausted_retries_report_concurrent_modification() {
    let store = Arc::new(ContendedStore::default());
    let index = Arc::new(RegistryIndex::new(RegistryId::from_u128(1), store.clone()));
    let ident = index.register("acme", "busy").await.unwrap();
    let manager = ChainManager::new(index.clone()).with_retry(RetryPolicy::fixed(Duration::from_millis(1)).with_max_retries(3));

    let err = manager
        .append(&ident, 1, fingerprint(b"v1"), "https://acme.org/busy.csv", ReleaseMetadata::default())
        .await
        .unwrap_err();

    assert_matches!(err, DatumError::ConcurrentModification { attempts: 4, .. });
    assert_eq!(store.appends.load(Ordering::SeqCst), 4);
    assert!(index.record(&ident).await.unwrap().chain.is_empty());
}

#[tokio::test]
async fn no_retry_policy_gives_up_after_one_attempt() {
    let store = Arc::new(ContendedStore::default());
    let index = Arc::new(RegistryIndex::new(RegistryId::from_u128(1), store.clone()));
    let ident = index.register("acme", "busy").await.unwrap();
    let manager = ChainManager::new(index).with_retry(RetryPolicy::none());

    let err = manager
        .append(&ident, 1, fingerprint(b"v1"), "https://acme.org/busy.csv", ReleaseMetadata::default())
        .await
        .unwrap_err();

    assert_matches!(err, DatumError::ConcurrentModification { attempts: 1, .. });
    assert_eq!(store.appends.load(Ordering::SeqCst), 1);
}
