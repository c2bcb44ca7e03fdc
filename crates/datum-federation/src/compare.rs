//! Pure chain comparison
//!
//! Decides what an exchange with one peer must do for one identifier, given
//! the local chain and the peer's advertised tip. Nothing here performs I/O.

use datum_core::{ChainHash, Release};
use datum_journal::VersionChain;
use serde::Serialize;

/// Where a peer stands relative to the local chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    /// Same tip version and hash
    InSync,
    /// Peer's tip is a prefix of ours; push releases after `after`
    PeerBehind {
        /// Peer's tip version
        after: u64,
    },
    /// Peer's tip is past ours; pull releases after `after`
    ///
    /// `after` sits below the local tip so the first pulled release overlaps
    /// the local chain and any fork shows up on ingest.
    PeerAhead {
        /// Exclusive lower bound of the pull
        after: u64,
    },
    /// Both hold a release at `version` and they differ
    Diverged {
        /// Version at which the chains disagree
        version: u64,
        /// Hash of the local release at that position
        local_hash: ChainHash,
        /// Hash the peer advertised
        remote_hash: ChainHash,
    },
    /// Peer holds the identifier, we do not
    LocalMissing,
    /// We hold the identifier, the peer does not
    PeerMissing,
}

impl SyncState {
    /// Whether releases flow from us to the peer
    pub fn pushes(&self) -> bool {
        matches!(self, Self::PeerBehind { .. } | Self::PeerMissing)
    }

    /// Whether releases flow from the peer to us
    pub fn pulls(&self) -> bool {
        matches!(self, Self::PeerAhead { .. } | Self::LocalMissing)
    }
}

/// Hash of the local release at `version`, or of the one occupying that
/// position when the local chain skipped it
fn occupant(local: &VersionChain, version: u64) -> Option<ChainHash> {
    local
        .releases()
        .iter()
        .find(|r| r.version >= version)
        .map(|r| r.hash)
}

/// Version of the release before the local tip, 0 for a single-release chain
fn predecessor_version(local: &VersionChain) -> u64 {
    let releases = local.releases();
    match releases.len() {
        0 | 1 => 0,
        n => releases[n - 2].version,
    }
}

/// Compare the local chain with a peer's advertised tip
pub fn compare(local: &VersionChain, remote: Option<(u64, ChainHash)>) -> SyncState {
    let (Some(local_version), Some(local_hash)) = (local.tip_version(), local.tip_hash()) else {
        return match remote {
            Some(_) => SyncState::LocalMissing,
            None => SyncState::InSync,
        };
    };
    let Some((remote_version, remote_hash)) = remote else {
        return SyncState::PeerMissing;
    };

    if remote_version == local_version {
        if remote_hash == local_hash {
            return SyncState::InSync;
        }
        return SyncState::Diverged {
            version: local_version,
            local_hash,
            remote_hash,
        };
    }

    if remote_version > local_version {
        return SyncState::PeerAhead {
            after: predecessor_version(local),
        };
    }

    match local.get(remote_version) {
        Some(held) if held.hash == remote_hash => SyncState::PeerBehind { after: remote_version },
        _ => SyncState::Diverged {
            version: remote_version,
            // The local tip is above remote_version so an occupant exists
            local_hash: occupant(local, remote_version).unwrap_or(local_hash),
            remote_hash,
        },
    }
}

/// Fork revealed by the first release of a pulled batch
///
/// The batch must start below or at the local tip's successor position;
/// a first release that neither matches the local release at its version
/// nor links to the local tip means the chains split.
pub fn first_divergence(local: &VersionChain, pulled: &[Release]) -> Option<SyncState> {
    let first = pulled.first()?;
    let diverged = |local_hash| SyncState::Diverged {
        version: first.version,
        local_hash,
        remote_hash: first.hash,
    };

    if let Some(held) = local.get(first.version) {
        return (held.hash != first.hash).then(|| diverged(held.hash));
    }
    let tip_hash = local.tip_hash()?;
    if local.tip_version().is_some_and(|tip| first.version < tip) {
        return occupant(local, first.version).map(diverged);
    }
    (first.previous != Some(tip_hash)).then(|| diverged(tip_hash))
}
