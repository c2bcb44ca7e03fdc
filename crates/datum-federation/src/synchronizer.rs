//! Federation synchronizer
//!
//! Reconciles every chain held locally or advertised by a peer:
//!
//! 1. fetch the peer's advertisements
//! 2. [`compare`] each identifier against the local chain
//! 3. push to peers that are behind, pull from peers that are ahead
//! 4. record divergences as integrity flags and report them
//! 5. checkpoint the agreed position after each successful exchange
//!
//! Runs periodically, on demand through [`FederationSynchronizer::sync_round`],
//! and whenever the index asks for a backfill.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_lock::RwLock;
use chrono::{DateTime, Utc};
use datum_core::config::SyncSection;
use datum_core::{ChainHash, Clock, DatumError, Identifier, RegistryId, Result, RetryPolicy};
use datum_journal::{RecordStatus, RegistryRecord, VersionChain};
use datum_registry::{BackfillRequest, IngestOutcome, RegistryIndex};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compare::{compare, first_divergence, SyncState};
use crate::policy::{DivergenceAction, DivergencePolicy, RecordAndSurface};
use crate::transport::SharedTransport;
use crate::wire::{Advertisement, PullRequest, PushMessage};

/// A divergence found during an exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DivergenceReport {
    /// Identifier whose chains split
    pub identifier: Identifier,
    /// Version at which they disagree
    pub version: u64,
    /// Local release hash
    pub local_hash: ChainHash,
    /// Peer release hash
    pub remote_hash: ChainHash,
}

/// A failure confined to one identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    /// Identifier being synced
    pub identifier: Identifier,
    /// What went wrong
    pub error: DatumError,
}

/// Outcome of one exchange with one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Peer synced with
    pub peer: RegistryId,
    /// When the exchange finished
    pub finished_at: DateTime<Utc>,
    /// Identifiers already in agreement
    pub in_sync: usize,
    /// Releases the peer applied from us
    pub pushed: usize,
    /// Releases we applied from the peer
    pub pulled: usize,
    /// Divergences detected
    pub divergences: Vec<DivergenceReport>,
    /// Per-identifier failures
    pub errors: Vec<SyncFailure>,
    /// Identifiers skipped because neither side was an eligible source
    pub skipped_unverified: Vec<Identifier>,
    /// Retirements adopted from the peer
    pub retired: Vec<Identifier>,
    /// Whether the divergence policy cut the exchange short
    pub suspended: bool,
}

impl SyncReport {
    fn new(peer: RegistryId, started_at: DateTime<Utc>) -> Self {
        Self {
            peer,
            finished_at: started_at,
            in_sync: 0,
            pushed: 0,
            pulled: 0,
            divergences: Vec::new(),
            errors: Vec::new(),
            skipped_unverified: Vec::new(),
            retired: Vec::new(),
            suspended: false,
        }
    }

    /// Whether nothing moved and nothing went wrong
    pub fn is_quiet(&self) -> bool {
        self.pushed == 0
            && self.pulled == 0
            && self.divergences.is_empty()
            && self.errors.is_empty()
            && self.retired.is_empty()
    }

    fn fail(&mut self, identifier: &Identifier, error: DatumError) {
        warn!(identifier = %identifier, peer = %self.peer, error = %error, "sync failure");
        self.errors.push(SyncFailure {
            identifier: identifier.clone(),
            error,
        });
    }
}

/// Replicates chains between this registry and its peers
pub struct FederationSynchronizer {
    index: Arc<RegistryIndex>,
    peers: RwLock<BTreeMap<RegistryId, SharedTransport>>,
    policy: Arc<dyn DivergencePolicy>,
    interval: Duration,
    request_timeout: Duration,
    batch: usize,
    retry: RetryPolicy,
    serviced_backfills: parking_lot::Mutex<HashMap<Identifier, u64>>,
    last_reports: parking_lot::Mutex<BTreeMap<RegistryId, SyncReport>>,
}

impl std::fmt::Debug for FederationSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationSynchronizer")
            .field("local", &self.index.local_id())
            .field("interval", &self.interval)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}

impl FederationSynchronizer {
    /// Synchronizer for `index` with default settings and no peers
    pub fn new(index: Arc<RegistryIndex>) -> Self {
        Self::from_config(index, &SyncSection::default())
    }

    /// Synchronizer configured from the `sync` section; peers are added separately
    pub fn from_config(index: Arc<RegistryIndex>, config: &SyncSection) -> Self {
        Self {
            index,
            peers: RwLock::new(BTreeMap::new()),
            policy: Arc::new(RecordAndSurface),
            interval: config.interval(),
            request_timeout: config.request_timeout(),
            batch: config.max_releases_per_message.max(1),
            retry: config.retry.clone(),
            serviced_backfills: parking_lot::Mutex::new(HashMap::new()),
            last_reports: parking_lot::Mutex::new(BTreeMap::new()),
        }
    }

    /// Replace the divergence policy
    pub fn with_policy(mut self, policy: Arc<dyn DivergencePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the retry policy for peer calls
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Releases per push or pull message
    pub fn with_batch_size(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    /// Index being replicated
    pub fn index(&self) -> &Arc<RegistryIndex> {
        &self.index
    }

    /// Add or replace a peer
    pub async fn add_peer(&self, transport: SharedTransport) {
        let peer = transport.peer();
        self.peers.write().await.insert(peer, transport);
        info!(peer = %peer, "peer added");
    }

    /// Remove a peer
    pub async fn remove_peer(&self, peer: RegistryId) -> bool {
        self.peers.write().await.remove(&peer).is_some()
    }

    /// Known peers
    pub async fn peers(&self) -> Vec<RegistryId> {
        self.peers.read().await.keys().copied().collect()
    }

    /// Most recent report per peer
    pub fn last_reports(&self) -> Vec<SyncReport> {
        self.last_reports.lock().values().cloned().collect()
    }

    async fn transport(&self, peer: RegistryId) -> Result<SharedTransport> {
        self.peers
            .read()
            .await
            .get(&peer)
            .cloned()
            .ok_or_else(|| DatumError::not_found(format!("peer {peer}")))
    }

    /// One peer call under the exchange deadline, retried while transient
    async fn call<T, F, Fut>(&self, peer: RegistryId, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = self.request_timeout;
        self.retry
            .execute(
                |_| {
                    let fut = operation();
                    async move {
                        tokio::time::timeout(deadline, fut)
                            .await
                            .map_err(|_| DatumError::fetch_transient(format!("peer:{peer}"), "peer exchange timed out"))?
                    }
                },
                DatumError::is_retryable,
            )
            .await
            .result
    }

    /// Sync every peer concurrently
    pub async fn sync_round(&self) -> Vec<(RegistryId, Result<SyncReport>)> {
        self.serviced_backfills.lock().clear();
        let peers = self.peers().await;
        let reports = join_all(peers.iter().map(|peer| self.sync_with_peer(*peer))).await;
        peers.into_iter().zip(reports).collect()
    }

    /// Run one exchange with `peer`
    pub async fn sync_with_peer(&self, peer: RegistryId) -> Result<SyncReport> {
        let transport = self.transport(peer).await?;
        let remote = self.call(peer, || transport.advertisements()).await?;
        if remote.registry != peer {
            return Err(DatumError::invalid_format(format!(
                "peer {peer} advertised as {}",
                remote.registry
            )));
        }

        let remote: BTreeMap<Identifier, Advertisement> = remote
            .advertisements
            .into_iter()
            .map(|adv| (adv.identifier.clone(), adv))
            .collect();
        let mut identifiers: BTreeSet<Identifier> = self.index.store().identifiers().await?.into_iter().collect();
        identifiers.extend(remote.keys().cloned());

        let mut report = SyncReport::new(peer, self.index.clock().now());
        for identifier in identifiers {
            if let Err(e) = self
                .sync_identifier(&transport, &identifier, remote.get(&identifier), &mut report)
                .await
            {
                report.fail(&identifier, e);
            }
            if report.suspended {
                break;
            }
        }
        report.finished_at = self.index.clock().now();

        if report.is_quiet() {
            debug!(peer = %peer, in_sync = report.in_sync, "sync exchange quiet");
        } else {
            info!(
                peer = %peer,
                pushed = report.pushed,
                pulled = report.pulled,
                divergences = report.divergences.len(),
                errors = report.errors.len(),
                "sync exchange complete"
            );
        }
        self.last_reports.lock().insert(peer, report.clone());
        Ok(report)
    }

    async fn sync_identifier(
        &self,
        transport: &SharedTransport,
        identifier: &Identifier,
        remote: Option<&Advertisement>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let peer = transport.peer();
        let record = self.index.store().load(identifier).await?;
        let chain = local_chain(record.as_ref(), identifier);
        let state = compare(&chain, remote.and_then(|adv| Some(adv.tip_version).zip(adv.tip_hash)));
        debug!(identifier = %identifier, peer = %peer, state = ?state, "compared chains");

        match state {
            SyncState::InSync => {
                report.in_sync += 1;
                if let (Some(version), Some(hash)) = (chain.tip_version(), chain.tip_hash()) {
                    self.index.set_checkpoint(identifier, peer, version, hash).await?;
                }
                let local_retired = record.as_ref().is_some_and(|r| r.status == RecordStatus::Retired);
                if local_retired && remote.is_some_and(|adv| adv.status != RecordStatus::Retired) {
                    let tip = chain.tip_version().unwrap_or(0);
                    self.push(transport, record.as_ref(), identifier, tip, report).await?;
                }
            }
            SyncState::Diverged { .. } => self.diverged(identifier, peer, state, report).await?,
            SyncState::PeerBehind { after } => self.push(transport, record.as_ref(), identifier, after, report).await?,
            SyncState::PeerMissing => self.push(transport, record.as_ref(), identifier, 0, report).await?,
            SyncState::PeerAhead { .. } | SyncState::LocalMissing
                if remote.is_some_and(|adv| !adv.is_eligible_source(peer)) =>
            {
                debug!(identifier = %identifier, peer = %peer, "peer holds a partial chain; not pulling");
                report.skipped_unverified.push(identifier.clone());
            }
            SyncState::PeerAhead { after } => self.pull(transport, identifier, after, report).await?,
            SyncState::LocalMissing => self.pull(transport, identifier, 0, report).await?,
        }

        if let Some(adv) = remote.filter(|adv| adv.status == RecordStatus::Retired && adv.is_eligible_source(peer)) {
            if !report.suspended && self.index.adopt_status(identifier, adv.home, adv.status).await? {
                report.retired.push(identifier.clone());
            }
        }
        Ok(())
    }

    async fn diverged(&self, identifier: &Identifier, peer: RegistryId, state: SyncState, report: &mut SyncReport) -> Result<()> {
        let SyncState::Diverged {
            version,
            local_hash,
            remote_hash,
        } = state
        else {
            return Ok(());
        };
        warn!(
            identifier = %identifier,
            peer = %peer,
            version,
            local = %local_hash.short(),
            remote = %remote_hash.short(),
            "chain divergence"
        );
        self.index
            .record_divergence(identifier, version, local_hash, remote_hash, Some(peer))
            .await?;
        report.divergences.push(DivergenceReport {
            identifier: identifier.clone(),
            version,
            local_hash,
            remote_hash,
        });
        if self.policy.on_divergence(identifier, peer, &state) == DivergenceAction::SuspendPeer {
            report.suspended = true;
        }
        Ok(())
    }

    async fn push(
        &self,
        transport: &SharedTransport,
        record: Option<&RegistryRecord>,
        identifier: &Identifier,
        mut after: u64,
        report: &mut SyncReport,
    ) -> Result<()> {
        let Some(record) = record else {
            return Ok(());
        };
        let local = self.index.local_id();
        let verified_full_chain = record.is_verified_full_chain();
        if !record.is_home(local) && !verified_full_chain {
            debug!(identifier = %identifier, "local chain is partial; not pushing");
            report.skipped_unverified.push(identifier.clone());
            return Ok(());
        }

        let peer = transport.peer();
        // A retired chain is announced even when the peer already holds every release
        let mut announce_status = record.status == RecordStatus::Retired;
        loop {
            let releases = self.index.releases_after(identifier, after, self.batch).await?;
            let last = releases.last().map(|r| r.version);
            if last.is_none() && !announce_status {
                return Ok(());
            }
            announce_status = false;
            let more = releases.len() == self.batch;
            let message = PushMessage {
                registry: local,
                identifier: identifier.clone(),
                home: record.home,
                verified_full_chain,
                status: record.status,
                releases,
            };
            let ack = self.call(peer, || transport.push(message.clone())).await?;
            report.pushed += ack.applied.len();
            if let Some(rejected) = ack.rejected {
                return Err(rejected);
            }
            if let Some(hash) = ack.tip_hash {
                self.index.set_checkpoint(identifier, peer, ack.tip_version, hash).await?;
            }
            match last {
                Some(last) if more => after = last,
                _ => return Ok(()),
            }
        }
    }

    async fn pull(&self, transport: &SharedTransport, identifier: &Identifier, mut after: u64, report: &mut SyncReport) -> Result<()> {
        let peer = transport.peer();
        let mut first_batch = true;
        let mut source_status = None;
        loop {
            let request = PullRequest {
                registry: self.index.local_id(),
                identifier: identifier.clone(),
                from_version: after,
                limit: self.batch,
            };
            let response = match self.call(peer, || transport.pull(request.clone())).await {
                Ok(response) => response,
                Err(DatumError::UnverifiedSource { .. }) => {
                    report.skipped_unverified.push(identifier.clone());
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            if response.identifier != *identifier {
                return Err(DatumError::invalid_format(format!(
                    "pull for {identifier} answered with {}",
                    response.identifier
                )));
            }

            if first_batch {
                first_batch = false;
                let record = self.index.store().load(identifier).await?;
                let chain = local_chain(record.as_ref(), identifier);
                if let Some(state) = first_divergence(&chain, &response.releases) {
                    return self.diverged(identifier, peer, state, report).await;
                }
            }

            source_status = Some((response.home, response.status));
            let Some(last) = response.releases.last().map(|r| r.version) else {
                break;
            };
            for release in response.releases {
                match self.index.ingest(release, response.home, Some(peer)).await? {
                    IngestOutcome::Applied { drained, .. } => report.pulled += 1 + drained.len(),
                    IngestOutcome::AlreadyKnown => {}
                }
            }
            if !response.has_more {
                break;
            }
            after = last;
        }
        if let Some((home, status)) = source_status {
            if self.index.adopt_status(identifier, home, status).await? {
                report.retired.push(identifier.clone());
            }
        }

        let record = self.index.record(identifier).await?;
        if let (Some(version), Some(hash)) = (record.chain.tip_version(), record.chain.tip_hash()) {
            self.index.set_checkpoint(identifier, peer, version, hash).await?;
        }
        Ok(())
    }

    /// Fetch the releases missing below a parked one
    ///
    /// Asks the home registry when it is a peer, otherwise the peer that
    /// sent the orphan, otherwise any peer. A request already serviced for
    /// the same tip is skipped until the next round.
    pub async fn handle_backfill(&self, request: BackfillRequest) -> Result<SyncReport> {
        let peers = self.peers.read().await.clone();
        let transport = peers
            .get(&request.home)
            .or_else(|| request.peer.and_then(|p| peers.get(&p)))
            .or_else(|| peers.values().next())
            .cloned()
            .ok_or_else(|| DatumError::not_found(format!("no peer to backfill {}", request.identifier)))?;

        let mut report = SyncReport::new(transport.peer(), self.index.clock().now());
        {
            let mut serviced = self.serviced_backfills.lock();
            if serviced
                .get(&request.identifier)
                .is_some_and(|done| *done >= request.after_version)
            {
                debug!(identifier = %request.identifier, after = request.after_version, "backfill already serviced");
                return Ok(report);
            }
            serviced.insert(request.identifier.clone(), request.after_version);
        }

        debug!(identifier = %request.identifier, peer = %transport.peer(), after = request.after_version, "servicing backfill");
        if let Err(e) = self
            .pull(&transport, &request.identifier, request.after_version, &mut report)
            .await
        {
            report.fail(&request.identifier, e);
        }
        report.finished_at = self.index.clock().now();
        Ok(report)
    }

    /// Sync periodically and service backfills until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut backfill = self.index.take_backfill_requests();
        if backfill.is_none() {
            warn!("backfill requests already taken; only periodic sync will run");
        }
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "federation synchronizer started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    for (peer, result) in self.sync_round().await {
                        if let Err(e) = result {
                            warn!(peer = %peer, error = %e, "sync exchange failed");
                        }
                    }
                }
                Some(request) = next_backfill(&mut backfill) => {
                    if let Err(e) = self.handle_backfill(request).await {
                        debug!(error = %e, "backfill not serviced");
                    }
                }
            }
        }
        info!("federation synchronizer stopped");
    }
}

async fn next_backfill(rx: &mut Option<mpsc::UnboundedReceiver<BackfillRequest>>) -> Option<BackfillRequest> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn local_chain(record: Option<&RegistryRecord>, identifier: &Identifier) -> VersionChain {
    record
        .map(|r| r.chain.clone())
        .unwrap_or_else(|| VersionChain::new(identifier.clone()))
}
