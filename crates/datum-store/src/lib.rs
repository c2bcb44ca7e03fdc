//! # Datum Store
//!
//! Persistence for [`RegistryRecord`]s behind the [`RecordStore`] trait.
//!
//! Appends are compare-and-set against the chain tip: a writer states the
//! tip it built on, and the store refuses the append if another writer got
//! there first. Callers retry from a fresh read. Two backends ship here:
//!
//! - [`MemoryRecordStore`]: process-local map, used by tests and ephemeral nodes
//! - [`FileRecordStore`]: one JSON document per identifier with atomic replace

#![forbid(unsafe_code)]

pub mod file;
pub mod memory;

use async_trait::async_trait;
use datum_core::{ChainHash, DatumError, Identifier, RegistryId, Release, Result};
use datum_journal::{IntegrityFlag, RecordStatus, RegistryRecord, SyncCheckpoint};

pub use file::FileRecordStore;
pub use memory::MemoryRecordStore;

/// Result of a compare-and-append
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The release is now the tip
    Appended,
    /// Another writer moved the tip; nothing was written
    TipMismatch {
        /// Tip hash the store currently holds
        current: Option<ChainHash>,
    },
}

/// Bookkeeping changes that never touch the chain itself
#[derive(Debug, Clone)]
pub enum RecordUpdate {
    /// Record the last agreed position with a peer
    SetCheckpoint {
        /// Peer registry
        peer: RegistryId,
        /// Agreed position
        checkpoint: SyncCheckpoint,
    },
    /// Raise an integrity flag
    Flag(IntegrityFlag),
    /// Change lifecycle status
    SetStatus(RecordStatus),
    /// Park a release until its predecessor arrives
    QueuePending {
        /// Release waiting on an ancestor
        release: Release,
        /// Maximum number of parked releases
        limit: usize,
    },
    /// Remove parked releases
    DropPending(Vec<u64>),
}

/// Apply an update in place
///
/// Returns `false` when the update changed nothing.
pub fn apply_update(record: &mut RegistryRecord, update: RecordUpdate) -> bool {
    match update {
        RecordUpdate::SetCheckpoint { peer, checkpoint } => {
            if record.checkpoints.get(&peer) == Some(&checkpoint) {
                return false;
            }
            record.checkpoints.insert(peer, checkpoint);
            true
        }
        RecordUpdate::Flag(flag) => record.flag(flag),
        RecordUpdate::SetStatus(status) => {
            let changed = record.status != status;
            record.status = status;
            changed
        }
        RecordUpdate::QueuePending { release, limit } => {
            if record.pending.contains_key(&release.version) {
                return false;
            }
            if record.pending.len() >= limit {
                tracing::warn!(
                    identifier = %record.identifier(),
                    version = release.version,
                    limit,
                    "pending queue full, dropping release"
                );
                return false;
            }
            record.pending.insert(release.version, release);
            true
        }
        RecordUpdate::DropPending(versions) => {
            let before = record.pending.len();
            for v in versions {
                record.pending.remove(&v);
            }
            before != record.pending.len()
        }
    }
}

/// Compare-and-append shared by the backends
///
/// Validates the release against the chain before writing; the caller
/// persists the record only on [`AppendOutcome::Appended`].
pub(crate) fn append_checked(
    record: &mut RegistryRecord,
    expected_tip: Option<ChainHash>,
    release: Release,
) -> Result<AppendOutcome> {
    let current = record.chain.tip_hash();
    if current != expected_tip {
        return Ok(AppendOutcome::TipMismatch { current });
    }
    let version = release.version;
    record.chain.push(release)?;
    record.pending.remove(&version);
    Ok(AppendOutcome::Appended)
}

/// Persistence for registry records
///
/// Every method is atomic with respect to the identifier it touches.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load a record
    async fn load(&self, identifier: &Identifier) -> Result<Option<RegistryRecord>>;

    /// Insert a new record; fails with `AlreadyExists` if one is present
    async fn create(&self, record: RegistryRecord) -> Result<()>;

    /// Append `release` only if the stored tip equals `expected_tip`
    async fn append_if_tip_matches(
        &self,
        identifier: &Identifier,
        expected_tip: Option<ChainHash>,
        release: Release,
    ) -> Result<AppendOutcome>;

    /// Apply a bookkeeping update and return the resulting record
    async fn update(&self, identifier: &Identifier, update: RecordUpdate) -> Result<RegistryRecord>;

    /// All stored identifiers in sorted order
    async fn identifiers(&self) -> Result<Vec<Identifier>>;

    /// Backend name for logs
    fn backend(&self) -> &'static str;

    /// Load a record or fail with `NotFound`
    async fn load_required(&self, identifier: &Identifier) -> Result<RegistryRecord> {
        self.load(identifier)
            .await?
            .ok_or_else(|| DatumError::not_found(identifier.to_string()))
    }
}
