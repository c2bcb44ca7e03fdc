//! Registry index
//!
//! The [`RegistryIndex`] is the per-instance authority mapping identifiers to
//! their version chains. It is the only path through which records change.
//!
//! Two write paths exist:
//!
//! - **Local** ([`RegistryIndex::try_publish`]): releases built by this
//!   registry for identifiers it is home to. Committed with
//!   append-if-tip-matches; the chain manager retries on a lost race.
//! - **Replicated** ([`RegistryIndex::ingest`]): releases received from
//!   peers. Checked against the local chain, which must verify. Releases
//!   whose predecessor is missing are parked and a backfill request is
//!   emitted; parked releases are applied as soon as their ancestors land.

use std::sync::Arc;

use datum_core::{
    ChainHash, Clock, DatumError, Identifier, IdentifierRef, RegistryId, Release, Result, SystemClock,
    VersionSelector,
};
use datum_journal::{IntegrityFlag, RecordStatus, RegistryRecord, ReleaseRelation, SyncCheckpoint, VersionChain};
use datum_store::{AppendOutcome, RecordStore, RecordUpdate};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::authority::{AllowAll, NamespaceAuthority};

/// Default bound on releases parked per identifier
pub const DEFAULT_PENDING_LIMIT: usize = 64;

/// Attempts at committing a replicated release before giving up on a busy record
const MAX_INGEST_ATTEMPTS: u32 = 8;

const ANNOUNCE_CAPACITY: usize = 256;

/// Request to fetch releases missing below a parked one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillRequest {
    /// Identifier with a gap
    pub identifier: Identifier,
    /// Local tip version; releases after it are wanted
    pub after_version: u64,
    /// Home registry of the identifier
    pub home: RegistryId,
    /// Peer that sent the orphaned release, if any
    pub peer: Option<RegistryId>,
}

/// Result of ingesting a replicated release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The release was appended, followed by any parked releases it unblocked
    Applied {
        /// Version appended
        version: u64,
        /// Parked versions appended afterwards
        drained: Vec<u64>,
    },
    /// The exact release was already present
    AlreadyKnown,
}

/// What this registry holds for one identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    /// Identifier
    pub identifier: Identifier,
    /// Home registry
    pub home: RegistryId,
    /// Tip version, 0 when the chain is empty
    pub tip_version: u64,
    /// Tip hash
    pub tip_hash: Option<ChainHash>,
    /// Whether the full chain is held and verifies
    pub verified_full_chain: bool,
    /// Lifecycle status
    pub status: RecordStatus,
}

/// A resolved release with the integrity state of its record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// The selected release
    pub release: Release,
    /// Tombstone that retracted it, if any
    pub retracted_by: Option<Release>,
    /// Home registry
    pub home: RegistryId,
    /// Lifecycle status
    pub status: RecordStatus,
    /// Highest version that verified
    pub verified_through: u64,
    /// Divergence and corruption markers
    pub markers: Vec<IntegrityFlag>,
}

/// Per-instance registry index
pub struct RegistryIndex {
    local: RegistryId,
    store: Arc<dyn RecordStore>,
    authority: Arc<dyn NamespaceAuthority>,
    clock: Arc<dyn Clock>,
    pending_limit: usize,
    backfill_tx: mpsc::UnboundedSender<BackfillRequest>,
    backfill_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<BackfillRequest>>>,
    announce: broadcast::Sender<Release>,
}

impl std::fmt::Debug for RegistryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryIndex")
            .field("local", &self.local)
            .field("store", &self.store.backend())
            .field("pending_limit", &self.pending_limit)
            .finish_non_exhaustive()
    }
}

impl RegistryIndex {
    /// Index for registry `local` over `store`
    pub fn new(local: RegistryId, store: Arc<dyn RecordStore>) -> Self {
        let (backfill_tx, backfill_rx) = mpsc::unbounded_channel();
        let (announce, _) = broadcast::channel(ANNOUNCE_CAPACITY);
        Self {
            local,
            store,
            authority: Arc::new(AllowAll),
            clock: Arc::new(SystemClock),
            pending_limit: DEFAULT_PENDING_LIMIT,
            backfill_tx,
            backfill_rx: parking_lot::Mutex::new(Some(backfill_rx)),
            announce,
        }
    }

    /// Replace the namespace authority
    pub fn with_authority(mut self, authority: Arc<dyn NamespaceAuthority>) -> Self {
        self.authority = authority;
        self
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound the per-identifier pending queue
    pub fn with_pending_limit(mut self, limit: usize) -> Self {
        self.pending_limit = limit;
        self
    }

    /// This registry's id
    pub fn local_id(&self) -> RegistryId {
        self.local
    }

    /// Clock used for timestamps
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Take the receiving end of backfill requests; only the first caller gets it
    pub fn take_backfill_requests(&self) -> Option<mpsc::UnboundedReceiver<BackfillRequest>> {
        self.backfill_rx.lock().take()
    }

    /// Subscribe to releases as they are appended
    pub fn subscribe(&self) -> broadcast::Receiver<Release> {
        self.announce.subscribe()
    }

    /// Create a new identifier homed at this registry
    pub async fn register(&self, namespace: &str, slug: &str) -> Result<Identifier> {
        let identifier = Identifier::new(namespace, slug)?;
        self.authority.authorize_register(identifier.namespace())?;
        let record = RegistryRecord::new(identifier.clone(), self.local, self.clock.now());
        self.store.create(record).await?;
        info!(identifier = %identifier, "identifier registered");
        Ok(identifier)
    }

    /// Load a record or fail with `NotFound`
    pub async fn record(&self, identifier: &Identifier) -> Result<RegistryRecord> {
        self.store.load_required(identifier).await
    }

    fn check_local_write(&self, record: &RegistryRecord, declared: u64) -> Result<()> {
        if !record.is_home(self.local) {
            return Err(DatumError::not_home(record.identifier(), record.home));
        }
        if !record.is_active() {
            return Err(DatumError::version_conflict(
                record.identifier(),
                declared,
                record.chain.tip_version(),
                "identifier is retired",
            ));
        }
        self.authority.authorize_publish(record.identifier().namespace())
    }

    /// Load a record and confirm this registry may append to it
    pub async fn writable_record(&self, identifier: &Identifier, declared: u64) -> Result<RegistryRecord> {
        let record = self.record(identifier).await?;
        self.check_local_write(&record, declared)?;
        Ok(record)
    }

    /// Commit a locally built release if the tip has not moved
    pub async fn try_publish(&self, release: Release) -> Result<AppendOutcome> {
        let identifier = release.identifier.clone();
        let record = self.record(&identifier).await?;
        self.check_local_write(&record, release.version)?;

        let outcome = self
            .store
            .append_if_tip_matches(&identifier, release.previous, release.clone())
            .await?;
        match &outcome {
            AppendOutcome::Appended => {
                info!(
                    identifier = %identifier,
                    version = release.version,
                    hash = %release.hash.short(),
                    tombstone = release.is_tombstone(),
                    "release published"
                );
                self.announce(&release);
            }
            AppendOutcome::TipMismatch { current } => {
                debug!(identifier = %identifier, version = release.version, current = ?current, "tip moved during publish");
            }
        }
        Ok(outcome)
    }

    /// Persist a locally built release
    ///
    /// A lost race surfaces as `ConcurrentModification`; use
    /// [`crate::ChainManager`] for retrying appends.
    pub async fn publish(&self, release: Release) -> Result<Release> {
        let identifier = release.identifier.clone();
        match self.try_publish(release.clone()).await? {
            AppendOutcome::Appended => Ok(release),
            AppendOutcome::TipMismatch { .. } => Err(DatumError::concurrent_modification(identifier, 1)),
        }
    }

    /// Close an identifier to new versions
    pub async fn retire(&self, identifier: &Identifier) -> Result<()> {
        let record = self.record(identifier).await?;
        if !record.is_home(self.local) {
            return Err(DatumError::not_home(identifier, record.home));
        }
        self.store
            .update(identifier, RecordUpdate::SetStatus(RecordStatus::Retired))
            .await?;
        info!(identifier = %identifier, "identifier retired");
        Ok(())
    }

    /// Adopt a retirement reported by an eligible source for a replica chain
    ///
    /// Status only moves forward: a replica never re-activates an
    /// identifier, and a home registry decides its own status. Returns
    /// whether the record changed.
    pub async fn adopt_status(&self, identifier: &Identifier, home: RegistryId, status: RecordStatus) -> Result<bool> {
        if status != RecordStatus::Retired {
            return Ok(false);
        }
        let Some(record) = self.store.load(identifier).await? else {
            return Ok(false);
        };
        if record.is_home(self.local) || record.status == RecordStatus::Retired {
            return Ok(false);
        }
        if record.home != home {
            return Err(DatumError::not_home(identifier, record.home));
        }
        self.store
            .update(identifier, RecordUpdate::SetStatus(RecordStatus::Retired))
            .await?;
        info!(identifier = %identifier, home = %home, "retirement replicated");
        Ok(true)
    }

    async fn create_replica(&self, identifier: &Identifier, home: RegistryId) -> Result<RegistryRecord> {
        let record = RegistryRecord::new(identifier.clone(), home, self.clock.now());
        match self.store.create(record).await {
            Ok(()) => debug!(identifier = %identifier, home = %home, "replica record created"),
            Err(DatumError::AlreadyExists { .. }) => {}
            Err(e) => return Err(e),
        }
        self.record(identifier).await
    }

    /// Apply a release received from `from`, whose chain is homed at `home`
    ///
    /// Re-applying a known release is a no-op. A different release at an
    /// already-held version is recorded as a divergence and rejected.
    pub async fn ingest(&self, release: Release, home: RegistryId, from: Option<RegistryId>) -> Result<IngestOutcome> {
        let identifier = release.identifier.clone();
        if !release.has_valid_hash() {
            return Err(DatumError::chain_corrupted(
                &identifier,
                release.version,
                "release hash does not match its fields",
            ));
        }

        let mut record = match self.store.load(&identifier).await? {
            Some(record) => record,
            None => self.create_replica(&identifier, home).await?,
        };
        if record.home != home {
            warn!(identifier = %identifier, claimed = %home, recorded = %record.home, "home registry mismatch");
            return Err(DatumError::not_home(&identifier, record.home));
        }

        for _ in 0..MAX_INGEST_ATTEMPTS {
            match record.chain.relation(&release) {
                ReleaseRelation::Known => {
                    debug!(identifier = %identifier, version = release.version, "release already known");
                    return Ok(IngestOutcome::AlreadyKnown);
                }
                ReleaseRelation::Conflicts { local_hash } => {
                    self.record_divergence(&identifier, release.version, local_hash, release.hash, from)
                        .await?;
                    return Err(DatumError::chain_divergence(
                        &identifier,
                        release.version,
                        local_hash,
                        release.hash,
                    ));
                }
                ReleaseRelation::Stale { tip_version } => {
                    return Err(DatumError::version_conflict(
                        &identifier,
                        release.version,
                        Some(tip_version),
                        "release does not extend the local tip",
                    ));
                }
                ReleaseRelation::Orphan | ReleaseRelation::Extends if record.is_home(self.local) && from.is_some() => {
                    warn!(identifier = %identifier, version = release.version, peer = ?from, "foreign release for a chain homed here");
                    return Err(DatumError::not_home(&identifier, self.local));
                }
                ReleaseRelation::Orphan => return Err(self.park(&record, release, from).await),
                ReleaseRelation::Extends => {
                    if let Err(e) = record.chain.verify() {
                        self.record_corruption(&identifier, &e).await?;
                        return Err(e);
                    }
                    let version = release.version;
                    let tip = record.chain.tip_hash();
                    match self.store.append_if_tip_matches(&identifier, tip, release.clone()).await? {
                        AppendOutcome::Appended => {
                            info!(identifier = %identifier, version, peer = ?from, "replicated release applied");
                            self.announce(&release);
                            let drained = self.drain_pending(&identifier).await?;
                            return Ok(IngestOutcome::Applied { version, drained });
                        }
                        AppendOutcome::TipMismatch { .. } => {
                            record = self.record(&identifier).await?;
                        }
                    }
                }
            }
        }
        Err(DatumError::concurrent_modification(identifier, MAX_INGEST_ATTEMPTS))
    }

    async fn park(&self, record: &RegistryRecord, release: Release, from: Option<RegistryId>) -> DatumError {
        let identifier = record.identifier().clone();
        let version = release.version;
        let previous = release
            .previous
            .map(|h| h.to_hex())
            .unwrap_or_else(|| "none".to_string());

        if release.previous.is_none() {
            // A second genesis can never be linked in
            return DatumError::version_conflict(
                &identifier,
                version,
                record.chain.tip_version(),
                "chain already has a genesis release",
            );
        }

        let update = RecordUpdate::QueuePending {
            release,
            limit: self.pending_limit,
        };
        if let Err(e) = self.store.update(&identifier, update).await {
            return e;
        }

        let request = BackfillRequest {
            identifier: identifier.clone(),
            after_version: record.chain.tip_version().unwrap_or(0),
            home: record.home,
            peer: from,
        };
        debug!(identifier = %identifier, version, after = request.after_version, "release parked, requesting backfill");
        if self.backfill_tx.send(request).is_err() {
            debug!(identifier = %identifier, "no backfill listener");
        }
        DatumError::unknown_ancestor(identifier, version, previous)
    }

    /// Apply parked releases that now extend the tip
    async fn drain_pending(&self, identifier: &Identifier) -> Result<Vec<u64>> {
        let mut applied = Vec::new();
        let mut mismatches = 0;
        loop {
            let record = self.record(identifier).await?;
            if record.pending.is_empty() {
                break;
            }
            let tip_version = record.chain.tip_version().unwrap_or(0);
            let tip_hash = record.chain.tip_hash();

            let stale: Vec<u64> = record.pending.range(..=tip_version).map(|(v, _)| *v).collect();
            if !stale.is_empty() {
                self.store.update(identifier, RecordUpdate::DropPending(stale)).await?;
            }

            let Some(next) = record
                .pending
                .range(tip_version + 1..)
                .map(|(_, r)| r)
                .find(|r| r.previous == tip_hash)
                .cloned()
            else {
                break;
            };

            if let Err(e) = record.chain.check_extends(&next) {
                warn!(identifier = %identifier, version = next.version, error = %e, "dropping invalid parked release");
                self.store
                    .update(identifier, RecordUpdate::DropPending(vec![next.version]))
                    .await?;
                continue;
            }

            match self.store.append_if_tip_matches(identifier, tip_hash, next.clone()).await? {
                AppendOutcome::Appended => {
                    debug!(identifier = %identifier, version = next.version, "parked release applied");
                    applied.push(next.version);
                    self.announce(&next);
                }
                AppendOutcome::TipMismatch { .. } => {
                    mismatches += 1;
                    if mismatches >= MAX_INGEST_ATTEMPTS {
                        break;
                    }
                }
            }
        }
        Ok(applied)
    }

    /// Record that a peer offered a different release at a held version
    pub async fn record_divergence(
        &self,
        identifier: &Identifier,
        version: u64,
        local_hash: ChainHash,
        remote_hash: ChainHash,
        peer: Option<RegistryId>,
    ) -> Result<()> {
        let flag = IntegrityFlag::Divergence {
            version,
            local_hash,
            remote_hash,
            peer,
            detected_at: self.clock.now(),
        };
        self.store.update(identifier, RecordUpdate::Flag(flag)).await?;
        Ok(())
    }

    async fn record_corruption(&self, identifier: &Identifier, error: &DatumError) -> Result<()> {
        let (version, reason) = match error {
            DatumError::ChainCorrupted { version, reason, .. } => (*version, reason.clone()),
            other => (0, other.to_string()),
        };
        let flag = IntegrityFlag::Corruption {
            version,
            reason,
            detected_at: self.clock.now(),
        };
        self.store.update(identifier, RecordUpdate::Flag(flag)).await?;
        Ok(())
    }

    /// Verify a stored chain, flagging the record on failure
    pub async fn verify_record(&self, identifier: &Identifier) -> Result<()> {
        let record = self.record(identifier).await?;
        if let Err(e) = record.chain.verify() {
            self.record_corruption(identifier, &e).await?;
            return Err(e);
        }
        Ok(())
    }

    /// The verified prefix of a record's chain, flagging corruption past it
    pub(crate) async fn verified_view(&self, record: &RegistryRecord) -> Result<(VersionChain, Vec<IntegrityFlag>)> {
        let (len, failure) = record.chain.verified_prefix_len();
        let mut flags = record.flags.clone();
        if let Some(e) = failure {
            warn!(identifier = %record.identifier(), error = %e, "serving verified prefix only");
            self.record_corruption(record.identifier(), &e).await?;
            flags = self.record(record.identifier()).await?.flags;
        }
        let chain = VersionChain::from_releases(record.identifier().clone(), record.chain.releases()[..len].to_vec());
        Ok((chain, flags))
    }

    /// Resolve a reference to a release
    ///
    /// `latest` selects the newest publication that has not been retracted.
    /// Only the verified prefix of a chain is ever served.
    pub async fn resolve(&self, reference: &IdentifierRef) -> Result<Resolution> {
        let record = self.record(&reference.identifier).await?;
        let (chain, markers) = self.verified_view(&record).await?;

        let release = match reference.version {
            VersionSelector::Exact(v) => chain.get(v),
            VersionSelector::Latest => chain.latest_publication(),
        }
        .cloned();
        let release = match (release, reference.version) {
            (Some(release), _) => release,
            // Held but past the verified prefix
            (None, VersionSelector::Exact(v)) if record.chain.get(v).is_some() => {
                let first_bad = record.chain.releases().get(chain.len()).map_or(v, |r| r.version);
                return Err(DatumError::chain_corrupted(
                    &reference.identifier,
                    first_bad,
                    format!("version {v} lies past the verified prefix"),
                ));
            }
            (None, _) => return Err(DatumError::not_found(reference.to_string())),
        };

        let retracted_by = chain.retraction_of(release.version).cloned();
        Ok(Resolution {
            retracted_by,
            home: record.home,
            status: record.status,
            verified_through: chain.tip_version().unwrap_or(0),
            markers,
            release,
        })
    }

    /// Summaries of every non-empty chain held
    pub async fn summaries(&self) -> Result<Vec<ChainSummary>> {
        let mut out = Vec::new();
        for identifier in self.store.identifiers().await? {
            let Some(record) = self.store.load(&identifier).await? else {
                continue;
            };
            if record.chain.is_empty() {
                continue;
            }
            out.push(ChainSummary {
                verified_full_chain: record.is_verified_full_chain(),
                tip_version: record.chain.tip_version().unwrap_or(0),
                tip_hash: record.chain.tip_hash(),
                home: record.home,
                status: record.status,
                identifier,
            });
        }
        Ok(out)
    }

    /// Verified releases after `after_version`, oldest first
    pub async fn releases_after(&self, identifier: &Identifier, after_version: u64, limit: usize) -> Result<Vec<Release>> {
        let record = self.record(identifier).await?;
        let (chain, _) = self.verified_view(&record).await?;
        Ok(chain.releases_after(after_version, limit).to_vec())
    }

    /// Record the position agreed with a peer
    pub async fn set_checkpoint(&self, identifier: &Identifier, peer: RegistryId, version: u64, hash: ChainHash) -> Result<()> {
        let checkpoint = SyncCheckpoint {
            version,
            hash,
            synced_at: self.clock.now(),
        };
        self.store
            .update(identifier, RecordUpdate::SetCheckpoint { peer, checkpoint })
            .await?;
        Ok(())
    }

    fn announce(&self, release: &Release) {
        // No subscribers is fine
        let _ = self.announce.send(release.clone());
    }
}
