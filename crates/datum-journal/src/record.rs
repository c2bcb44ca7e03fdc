//! Registry records
//!
//! A [`RegistryRecord`] is everything one registry knows about one
//! identifier: the version chain, the home registry, per-peer sync
//! checkpoints, integrity flags and releases waiting on a missing ancestor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use datum_core::{ChainHash, Identifier, Release, RegistryId};
use serde::{Deserialize, Serialize};

use crate::chain::VersionChain;

/// Lifecycle of an identifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Accepting new versions
    #[default]
    Active,
    /// No further versions accepted; history stays resolvable
    Retired,
}

/// Last position agreed with a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    /// Version both sides held
    pub version: u64,
    /// Hash of that release
    pub hash: ChainHash,
    /// When the exchange completed
    pub synced_at: DateTime<Utc>,
}

/// Integrity problem recorded against an identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityFlag {
    /// A peer holds a different release at the same version
    Divergence {
        /// Version at which the chains disagree
        version: u64,
        /// Our release hash
        local_hash: ChainHash,
        /// The peer's release hash
        remote_hash: ChainHash,
        /// Registry that offered the conflicting release
        peer: Option<RegistryId>,
        /// When it was noticed
        detected_at: DateTime<Utc>,
    },
    /// The local chain failed verification
    Corruption {
        /// First offending version
        version: u64,
        /// What failed
        reason: String,
        /// When it was noticed
        detected_at: DateTime<Utc>,
    },
}

impl IntegrityFlag {
    /// Version the flag refers to
    pub fn version(&self) -> u64 {
        match self {
            Self::Divergence { version, .. } | Self::Corruption { version, .. } => *version,
        }
    }

    fn same_problem(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Divergence {
                    version: a,
                    remote_hash: ra,
                    ..
                },
                Self::Divergence {
                    version: b,
                    remote_hash: rb,
                    ..
                },
            ) => a == b && ra == rb,
            (Self::Corruption { version: a, .. }, Self::Corruption { version: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// Everything a registry holds about one identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    /// Version history
    pub chain: VersionChain,
    /// Registry authoritative for new versions
    pub home: RegistryId,
    /// Lifecycle status
    #[serde(default)]
    pub status: RecordStatus,
    /// When this registry first learned of the identifier
    pub created_at: DateTime<Utc>,
    /// Per-peer sync positions
    #[serde(default)]
    pub checkpoints: BTreeMap<RegistryId, SyncCheckpoint>,
    /// Recorded integrity problems
    #[serde(default)]
    pub flags: Vec<IntegrityFlag>,
    /// Releases waiting for a missing predecessor, by version
    #[serde(default)]
    pub pending: BTreeMap<u64, Release>,
}

impl RegistryRecord {
    /// Fresh record with an empty chain
    pub fn new(identifier: Identifier, home: RegistryId, created_at: DateTime<Utc>) -> Self {
        Self {
            chain: VersionChain::new(identifier),
            home,
            status: RecordStatus::Active,
            created_at,
            checkpoints: BTreeMap::new(),
            flags: Vec::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Identifier of the record
    pub fn identifier(&self) -> &Identifier {
        self.chain.identifier()
    }

    /// Whether `registry` is the home of this identifier
    pub fn is_home(&self, registry: RegistryId) -> bool {
        self.home == registry
    }

    /// Whether the identifier still accepts versions
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }

    /// Record an integrity problem; repeated reports of the same problem are ignored
    ///
    /// Returns `true` when the flag is new.
    pub fn flag(&mut self, flag: IntegrityFlag) -> bool {
        if self.flags.iter().any(|f| f.same_problem(&flag)) {
            return false;
        }
        tracing::warn!(
            identifier = %self.identifier(),
            version = flag.version(),
            flag = ?flag,
            "integrity flag raised"
        );
        self.flags.push(flag);
        true
    }

    /// Whether any peer divergence has been recorded
    pub fn has_divergence(&self) -> bool {
        self.flags
            .iter()
            .any(|f| matches!(f, IntegrityFlag::Divergence { .. }))
    }

    /// Whether local corruption has been recorded
    pub fn has_corruption(&self) -> bool {
        self.flags
            .iter()
            .any(|f| matches!(f, IntegrityFlag::Corruption { .. }))
    }

    /// Whether this registry holds a complete chain that verifies
    ///
    /// Only such holders may serve the chain to peers as a source.
    pub fn is_verified_full_chain(&self) -> bool {
        !self.has_corruption() && self.chain.verify().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use datum_core::fingerprint::fingerprint;
    use datum_core::ReleaseMetadata;

    fn record() -> RegistryRecord {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut rec = RegistryRecord::new(
            Identifier::parse("noaa/sea-surface").unwrap(),
            RegistryId::from_u128(1),
            now,
        );
        let r = rec
            .chain
            .prepare_publication(1, fingerprint(b"sst"), "https://noaa.gov/sst.nc", ReleaseMetadata::default(), now)
            .unwrap();
        rec.chain.push(r).unwrap();
        rec
    }

    #[test]
    fn test_flags_are_deduplicated() {
        let mut rec = record();
        let now = rec.created_at;
        let local = rec.chain.tip_hash().unwrap();
        let flag = IntegrityFlag::Divergence {
            version: 1,
            local_hash: local,
            remote_hash: ChainHash([7; 32]),
            peer: Some(RegistryId::from_u128(2)),
            detected_at: now,
        };
        assert!(rec.flag(flag.clone()));
        assert!(!rec.flag(flag));
        assert!(rec.has_divergence());
        assert_eq!(rec.flags.len(), 1);
    }

    #[test]
    fn test_corruption_revokes_full_chain_status() {
        let mut rec = record();
        assert!(rec.is_verified_full_chain());
        rec.flag(IntegrityFlag::Corruption {
            version: 1,
            reason: "disk".into(),
            detected_at: rec.created_at,
        });
        assert!(!rec.is_verified_full_chain());
    }

    #[test]
    fn test_record_survives_json() {
        let rec = record();
        let json = serde_json::to_string(&rec).unwrap();
        let back: RegistryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
        assert!(back.chain.verify().is_ok());
    }
}
