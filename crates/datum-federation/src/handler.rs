//! Serving side of the federation protocol

use std::sync::Arc;

use datum_core::{DatumError, Result};
use datum_journal::RecordStatus;
use datum_registry::{IngestOutcome, RegistryIndex};
use tracing::{debug, info, warn};

use crate::wire::{Advertisement, AdvertisementSet, PullRequest, PullResponse, PushAck, PushMessage};

/// Answers advertisement, pull and push requests from peers
#[derive(Debug, Clone)]
pub struct FederationHandler {
    index: Arc<RegistryIndex>,
    max_releases: usize,
}

impl FederationHandler {
    /// Handler over `index`, carrying at most `max_releases` per message
    pub fn new(index: Arc<RegistryIndex>, max_releases: usize) -> Self {
        Self {
            index,
            max_releases: max_releases.max(1),
        }
    }

    /// Index served by this handler
    pub fn index(&self) -> &Arc<RegistryIndex> {
        &self.index
    }

    /// Every chain held here
    pub async fn advertisements(&self) -> Result<AdvertisementSet> {
        let advertisements = self
            .index
            .summaries()
            .await?
            .into_iter()
            .map(Advertisement::from)
            .collect();
        Ok(AdvertisementSet {
            registry: self.index.local_id(),
            advertisements,
        })
    }

    /// Serve releases after `from_version`
    ///
    /// Only a home registry or a holder of the full verified chain serves.
    pub async fn handle_pull(&self, request: PullRequest) -> Result<PullResponse> {
        let local = self.index.local_id();
        let record = self.index.record(&request.identifier).await?;
        if !record.is_home(local) && !record.is_verified_full_chain() {
            debug!(identifier = %request.identifier, peer = %request.registry, "refusing pull from partial chain");
            return Err(DatumError::unverified_source(&request.identifier, local));
        }

        let limit = request.limit.clamp(1, self.max_releases);
        let mut releases = self
            .index
            .releases_after(&request.identifier, request.from_version, limit + 1)
            .await?;
        let has_more = releases.len() > limit;
        releases.truncate(limit);
        debug!(
            identifier = %request.identifier,
            peer = %request.registry,
            from = request.from_version,
            count = releases.len(),
            "serving pull"
        );
        Ok(PullResponse {
            identifier: request.identifier,
            home: record.home,
            releases,
            has_more,
            status: record.status,
        })
    }

    /// Apply releases pushed by a peer, in order
    ///
    /// Processing stops at the first rejection, which is reported in the ack.
    /// Orphans are parked and do not stop processing; later releases may
    /// park behind them.
    pub async fn handle_push(&self, message: PushMessage) -> Result<PushAck> {
        let identifier = message.identifier.clone();
        if message.registry != message.home && !message.verified_full_chain {
            warn!(identifier = %identifier, peer = %message.registry, "push from unverified partial holder");
            return Err(DatumError::unverified_source(&identifier, message.registry));
        }
        if message.releases.len() > self.max_releases {
            return Err(DatumError::invalid_format(format!(
                "push carries {} releases, limit is {}",
                message.releases.len(),
                self.max_releases
            )));
        }
        if let Some(stray) = message.releases.iter().find(|r| r.identifier != identifier) {
            return Err(DatumError::invalid_format(format!(
                "push for {identifier} carries a release of {}",
                stray.identifier
            )));
        }
        if message.releases.windows(2).any(|w| w[0].version >= w[1].version) {
            return Err(DatumError::invalid_format(format!(
                "push for {identifier} is not in version order"
            )));
        }

        let mut applied = Vec::new();
        let mut already_known = 0;
        let mut rejected = None;
        for release in message.releases {
            match self.index.ingest(release, message.home, Some(message.registry)).await {
                Ok(IngestOutcome::Applied { version, drained }) => {
                    applied.push(version);
                    applied.extend(drained);
                }
                Ok(IngestOutcome::AlreadyKnown) => already_known += 1,
                Err(e @ DatumError::UnknownAncestor { .. }) => {
                    rejected.get_or_insert(e);
                }
                Err(e) => {
                    rejected = Some(e);
                    break;
                }
            }
        }

        let (tip_version, tip_hash) = match self.index.store().load(&identifier).await? {
            Some(record) => (record.chain.tip_version().unwrap_or(0), record.chain.tip_hash()),
            None => (0, None),
        };
        if rejected.is_none() {
            if let Some(hash) = tip_hash {
                self.index
                    .set_checkpoint(&identifier, message.registry, tip_version, hash)
                    .await?;
            }
        }
        if rejected.is_none() && message.status == RecordStatus::Retired {
            self.index.adopt_status(&identifier, message.home, message.status).await?;
        }
        if !applied.is_empty() {
            info!(identifier = %identifier, peer = %message.registry, applied = applied.len(), tip = tip_version, "push applied");
        }

        Ok(PushAck {
            registry: self.index.local_id(),
            identifier,
            applied,
            already_known,
            tip_version,
            tip_hash,
            rejected,
        })
    }
}
