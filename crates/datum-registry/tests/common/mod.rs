//! Shared fixtures for registry tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use datum_core::fingerprint::fingerprint;
use datum_core::{DigestAlgorithm, Identifier, ManualClock, RegistryId, Release, ReleaseMetadata, RetryPolicy};
use datum_fetch::{FetchClient, MemoryOrigin};
use datum_registry::{ChainManager, PublishService, RegistryIndex};
use datum_store::{MemoryRecordStore, RecordStore};

pub struct Fixture {
    pub id: RegistryId,
    pub store: Arc<MemoryRecordStore>,
    pub clock: Arc<ManualClock>,
    pub index: Arc<RegistryIndex>,
    pub manager: ChainManager,
    pub origin: Arc<MemoryOrigin>,
    pub service: PublishService,
}

pub fn fixture(seed: u128) -> Fixture {
    let id = RegistryId::from_u128(seed);
    let store = Arc::new(MemoryRecordStore::new());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap()));
    let index = Arc::new(RegistryIndex::new(id, store.clone()).with_clock(clock.clone()));
    let manager = ChainManager::new(index.clone());
    let origin = Arc::new(MemoryOrigin::new());
    let fetch = FetchClient::new(origin.clone()).with_retry(RetryPolicy::none());
    let service = PublishService::new(manager.clone(), fetch, DigestAlgorithm::Sha256);
    Fixture {
        id,
        store,
        clock,
        index,
        manager,
        origin,
        service,
    }
}

impl Fixture {
    /// Register `raw` and publish `versions`, advancing the clock between releases
    pub async fn seed(&self, raw: &str, versions: &[u64]) -> Identifier {
        let ident = Identifier::parse(raw).unwrap();
        if self.index.store().load(&ident).await.unwrap().is_none() {
            self.index.register(ident.namespace(), ident.slug()).await.unwrap();
        }
        for v in versions {
            self.clock.advance(chrono::Duration::minutes(1));
            self.manager
                .append(
                    &ident,
                    *v,
                    fingerprint(format!("{raw}-{v}").as_bytes()),
                    &format!("https://{}/data/{}-{v}.csv", ident.namespace(), ident.slug()),
                    ReleaseMetadata::default(),
                )
                .await
                .unwrap();
        }
        ident
    }

    pub async fn releases(&self, ident: &Identifier) -> Vec<Release> {
        self.index.record(ident).await.unwrap().chain.releases().to_vec()
    }
}
