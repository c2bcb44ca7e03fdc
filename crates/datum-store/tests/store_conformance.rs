//! Behaviour every record store backend must share

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use datum_core::fingerprint::fingerprint;
use datum_core::{ChainHash, DatumError, Identifier, RegistryId, Release, ReleaseMetadata};
use datum_journal::{IntegrityFlag, RecordStatus, RegistryRecord, SyncCheckpoint};
use datum_store::{AppendOutcome, FileRecordStore, MemoryRecordStore, RecordStore, RecordUpdate};

fn id() -> Identifier {
    Identifier::parse("who/mortality").unwrap()
}

fn home() -> RegistryId {
    RegistryId::from_u128(0xA)
}

fn next_release(record: &RegistryRecord, version: u64) -> Release {
    record
        .chain
        .prepare_publication(
            version,
            fingerprint(format!("mortality-{version}").as_bytes()),
            format!("https://who.int/mortality-{version}.csv"),
            ReleaseMetadata::default(),
            Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()
}

async fn stores() -> (Vec<Arc<dyn RecordStore>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let file = FileRecordStore::open(dir.path()).await.unwrap();
    (vec![Arc::new(MemoryRecordStore::new()), Arc::new(file)], dir)
}

#[tokio::test]
async fn create_is_exclusive() {
    let (stores, _dir) = stores().await;
    for store in stores {
        let record = RegistryRecord::new(id(), home(), Utc::now());
        store.create(record.clone()).await.unwrap();
        let err = store.create(record).await.unwrap_err();
        assert_matches!(err, DatumError::AlreadyExists { .. }, "backend {}", store.backend());
    }
}

#[tokio::test]
async fn append_checks_expected_tip() {
    let (stores, _dir) = stores().await;
    for store in stores {
        store.create(RegistryRecord::new(id(), home(), Utc::now())).await.unwrap();
        let record = store.load_required(&id()).await.unwrap();

        let v1 = next_release(&record, 1);
        let v1_hash = v1.hash;
        assert_eq!(
            store.append_if_tip_matches(&id(), None, v1).await.unwrap(),
            AppendOutcome::Appended
        );

        // A writer still holding the empty-chain view loses the race
        let stale = next_release(&record, 2);
        assert_eq!(
            store.append_if_tip_matches(&id(), None, stale).await.unwrap(),
            AppendOutcome::TipMismatch {
                current: Some(v1_hash)
            }
        );

        let fresh = store.load_required(&id()).await.unwrap();
        let v2 = next_release(&fresh, 2);
        assert_eq!(
            store.append_if_tip_matches(&id(), Some(v1_hash), v2).await.unwrap(),
            AppendOutcome::Appended
        );
        let stored = store.load_required(&id()).await.unwrap();
        assert_eq!(stored.chain.tip_version(), Some(2));
        stored.chain.verify().unwrap();
    }
}

#[tokio::test]
async fn invalid_release_leaves_record_untouched() {
    let (stores, _dir) = stores().await;
    for store in stores {
        store.create(RegistryRecord::new(id(), home(), Utc::now())).await.unwrap();
        let record = store.load_required(&id()).await.unwrap();
        let mut forged = next_release(&record, 1);
        forged.origin_url = "https://elsewhere.example/x".into();

        let err = store.append_if_tip_matches(&id(), None, forged).await.unwrap_err();
        assert_matches!(err, DatumError::ChainCorrupted { .. });
        assert!(store.load_required(&id()).await.unwrap().chain.is_empty());
    }
}

#[tokio::test]
async fn missing_record_is_not_found() {
    let (stores, _dir) = stores().await;
    for store in stores {
        assert!(store.load(&id()).await.unwrap().is_none());
        let err = store
            .update(&id(), RecordUpdate::SetStatus(RecordStatus::Retired))
            .await
            .unwrap_err();
        assert_matches!(err, DatumError::NotFound { .. });
    }
}

#[tokio::test]
async fn bookkeeping_updates_persist() {
    let (stores, _dir) = stores().await;
    for store in stores {
        store.create(RegistryRecord::new(id(), home(), Utc::now())).await.unwrap();
        let peer = RegistryId::from_u128(0xB);
        let at = Utc::now();

        store
            .update(
                &id(),
                RecordUpdate::SetCheckpoint {
                    peer,
                    checkpoint: SyncCheckpoint {
                        version: 3,
                        hash: ChainHash([3; 32]),
                        synced_at: at,
                    },
                },
            )
            .await
            .unwrap();
        store
            .update(
                &id(),
                RecordUpdate::Flag(IntegrityFlag::Corruption {
                    version: 2,
                    reason: "bad link".into(),
                    detected_at: at,
                }),
            )
            .await
            .unwrap();
        store
            .update(&id(), RecordUpdate::SetStatus(RecordStatus::Retired))
            .await
            .unwrap();

        let stored = store.load_required(&id()).await.unwrap();
        assert_eq!(stored.checkpoints.get(&peer).map(|c| c.version), Some(3));
        assert_eq!(stored.flags.len(), 1);
        assert_eq!(stored.status, RecordStatus::Retired);
    }
}

#[tokio::test]
async fn pending_queue_is_bounded() {
    let (stores, _dir) = stores().await;
    for store in stores {
        store.create(RegistryRecord::new(id(), home(), Utc::now())).await.unwrap();
        let mut scratch = RegistryRecord::new(id(), home(), Utc::now());
        for v in 1..=4 {
            let r = next_release(&scratch, v);
            scratch.chain.push(r).unwrap();
        }
        for r in scratch.chain.releases().iter().skip(1) {
            store
                .update(
                    &id(),
                    RecordUpdate::QueuePending {
                        release: r.clone(),
                        limit: 2,
                    },
                )
                .await
                .unwrap();
        }
        let stored = store.load_required(&id()).await.unwrap();
        assert_eq!(stored.pending.keys().copied().collect::<Vec<_>>(), vec![2, 3]);

        let stored = store
            .update(&id(), RecordUpdate::DropPending(vec![2]))
            .await
            .unwrap();
        assert_eq!(stored.pending.len(), 1);
    }
}

#[tokio::test]
async fn identifiers_are_listed_sorted() {
    let (stores, _dir) = stores().await;
    for store in stores {
        for raw in ["zeta/b", "alpha/z", "alpha/a"] {
            let ident = Identifier::parse(raw).unwrap();
            store.create(RegistryRecord::new(ident, home(), Utc::now())).await.unwrap();
        }
        let listed: Vec<String> = store
            .identifiers()
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(listed, vec!["alpha/a", "alpha/z", "zeta/b"]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_produce_one_winner_per_tip() {
    let (stores, _dir) = stores().await;
    for store in stores {
        store.create(RegistryRecord::new(id(), home(), Utc::now())).await.unwrap();
        let base = store.load_required(&id()).await.unwrap();

        let mut handles = Vec::new();
        for n in 0..8u64 {
            let store = store.clone();
            let release = next_release(&base, n + 1);
            handles.push(tokio::spawn(async move {
                store.append_if_tip_matches(&id(), None, release).await.unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() == AppendOutcome::Appended {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "backend {}", store.backend());
        assert_eq!(store.load_required(&id()).await.unwrap().chain.len(), 1);
    }
}
