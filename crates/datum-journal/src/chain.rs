//! Version chains
//!
//! A [`VersionChain`] is the ordered, hash-linked list of releases for one
//! identifier. All validation lives here as pure functions over the chain:
//! preparing a new publication or tombstone, checking that a release received
//! from elsewhere extends the tip, and walking the whole chain to verify it.

use chrono::{DateTime, Utc};
use datum_core::{
    ChainHash, DatumError, Fingerprint, Identifier, Release, ReleaseDraft, ReleaseKind,
    ReleaseMetadata, Result,
};
use serde::{Deserialize, Serialize};

/// How an incoming release relates to a local chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseRelation {
    /// The exact release is already in the chain
    Known,
    /// The release extends the current tip
    Extends,
    /// A different release already holds this version
    Conflicts {
        /// Hash of the local release at that version
        local_hash: ChainHash,
    },
    /// The release's version does not advance past the tip
    Stale {
        /// Current tip version
        tip_version: u64,
    },
    /// The release links to a predecessor that is not in the chain
    Orphan,
}

/// Ordered, hash-linked releases of one identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChain {
    identifier: Identifier,
    releases: Vec<Release>,
}

impl VersionChain {
    /// Empty chain for an identifier
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            releases: Vec::new(),
        }
    }

    /// Wrap releases without verifying them; call [`VersionChain::verify`] before trusting
    pub fn from_releases(identifier: Identifier, releases: Vec<Release>) -> Self {
        Self {
            identifier,
            releases,
        }
    }

    /// Identifier this chain belongs to
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// All releases, oldest first
    pub fn releases(&self) -> &[Release] {
        &self.releases
    }

    /// Number of releases
    pub fn len(&self) -> usize {
        self.releases.len()
    }

    /// Whether the chain has no releases yet
    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    /// Newest release
    pub fn tip(&self) -> Option<&Release> {
        self.releases.last()
    }

    /// Newest version number
    pub fn tip_version(&self) -> Option<u64> {
        self.tip().map(|r| r.version)
    }

    /// Hash of the newest release
    pub fn tip_hash(&self) -> Option<ChainHash> {
        self.tip().map(|r| r.hash)
    }

    /// Release at an exact version
    pub fn get(&self, version: u64) -> Option<&Release> {
        self.releases
            .binary_search_by_key(&version, |r| r.version)
            .ok()
            .map(|idx| &self.releases[idx])
    }

    /// Whether a release with this hash is in the chain
    pub fn contains_hash(&self, hash: &ChainHash) -> bool {
        self.releases.iter().any(|r| r.hash == *hash)
    }

    /// Releases with version strictly greater than `after`, at most `limit`
    pub fn releases_after(&self, after: u64, limit: usize) -> &[Release] {
        let start = self.releases.partition_point(|r| r.version <= after);
        let end = start.saturating_add(limit).min(self.releases.len());
        &self.releases[start..end]
    }

    /// Tombstone that retracted `version`, if any
    pub fn retraction_of(&self, version: u64) -> Option<&Release> {
        self.releases.iter().find(|r| r.retracts() == Some(version))
    }

    /// Whether `version` has been retracted
    pub fn is_retracted(&self, version: u64) -> bool {
        self.retraction_of(version).is_some()
    }

    /// Newest publication that has not been retracted
    pub fn latest_publication(&self) -> Option<&Release> {
        self.releases
            .iter()
            .rev()
            .find(|r| !r.is_tombstone() && !self.is_retracted(r.version))
    }

    /// Gap flag a release at `version` must carry when appended to this chain
    fn expected_gap(&self, version: u64) -> Option<u64> {
        let tip = self.tip_version().unwrap_or(0);
        (version > tip + 1).then_some(tip)
    }

    fn check_version_advances(&self, version: u64) -> Result<()> {
        if version == 0 {
            return Err(DatumError::version_conflict(
                &self.identifier,
                version,
                self.tip_version(),
                "versions start at 1",
            ));
        }
        if let Some(tip) = self.tip_version() {
            if version <= tip {
                return Err(DatumError::version_conflict(
                    &self.identifier,
                    version,
                    Some(tip),
                    format!("version must be greater than current tip {tip}"),
                ));
            }
        }
        Ok(())
    }

    fn check_retraction_target(&self, retracts: u64, upto: usize) -> std::result::Result<(), String> {
        let earlier = &self.releases[..upto];
        let target = earlier.iter().find(|r| r.version == retracts);
        match target {
            None => Err(format!("retracted version {retracts} does not exist")),
            Some(r) if r.is_tombstone() => Err(format!("version {retracts} is a tombstone")),
            Some(_) if earlier.iter().any(|r| r.retracts() == Some(retracts)) => {
                Err(format!("version {retracts} is already retracted"))
            }
            Some(_) => Ok(()),
        }
    }

    /// Build the next publication on top of the tip
    pub fn prepare_publication(
        &self,
        version: u64,
        fingerprint: Fingerprint,
        origin_url: impl Into<String>,
        metadata: ReleaseMetadata,
        now: DateTime<Utc>,
    ) -> Result<Release> {
        self.check_version_advances(version)?;
        fingerprint.validate()?;

        Ok(ReleaseDraft {
            identifier: self.identifier.clone(),
            version,
            kind: ReleaseKind::Publication,
            fingerprint,
            origin_url: origin_url.into(),
            published_at: now,
            previous: self.tip_hash(),
            gap_from: self.expected_gap(version),
            metadata,
        }
        .seal())
    }

    /// Build a tombstone retracting `version`; it takes the next version number
    pub fn prepare_retraction(&self, version: u64, reason: impl Into<String>, now: DateTime<Utc>) -> Result<Release> {
        let target = self
            .get(version)
            .ok_or_else(|| DatumError::not_found(format!("{}@{version}", self.identifier)))?;
        if target.is_tombstone() {
            return Err(DatumError::version_conflict(
                &self.identifier,
                version,
                self.tip_version(),
                "cannot retract a tombstone",
            ));
        }
        if self.is_retracted(version) {
            return Err(DatumError::version_conflict(
                &self.identifier,
                version,
                self.tip_version(),
                "version is already retracted",
            ));
        }

        let next = self.tip_version().unwrap_or(0) + 1;
        Ok(ReleaseDraft {
            identifier: self.identifier.clone(),
            version: next,
            kind: ReleaseKind::Retraction {
                retracts: version,
                reason: reason.into(),
            },
            fingerprint: target.fingerprint.clone(),
            origin_url: target.origin_url.clone(),
            published_at: now,
            previous: self.tip_hash(),
            gap_from: None,
            metadata: ReleaseMetadata::default(),
        }
        .seal())
    }

    /// Classify an incoming release against this chain
    pub fn relation(&self, release: &Release) -> ReleaseRelation {
        if let Some(local) = self.get(release.version) {
            if local.hash == release.hash {
                return ReleaseRelation::Known;
            }
            return ReleaseRelation::Conflicts {
                local_hash: local.hash,
            };
        }
        if let Some(tip) = self.tip_version() {
            if release.version <= tip {
                return ReleaseRelation::Stale { tip_version: tip };
            }
        }
        if release.previous == self.tip_hash() {
            ReleaseRelation::Extends
        } else {
            ReleaseRelation::Orphan
        }
    }

    /// Validate that `release` is a well-formed extension of the tip
    pub fn check_extends(&self, release: &Release) -> Result<()> {
        if release.identifier != self.identifier {
            return Err(DatumError::invalid_format(format!(
                "release for {} offered to chain of {}",
                release.identifier, self.identifier
            )));
        }
        if !release.has_valid_hash() {
            return Err(DatumError::chain_corrupted(
                &self.identifier,
                release.version,
                "release hash does not match its fields",
            ));
        }
        release.fingerprint.validate()?;
        self.check_version_advances(release.version)?;
        if release.previous != self.tip_hash() {
            let previous = release
                .previous
                .map(|h| h.to_hex())
                .unwrap_or_else(|| "none".to_string());
            return Err(DatumError::unknown_ancestor(&self.identifier, release.version, previous));
        }
        if release.gap_from != self.expected_gap(release.version) {
            return Err(DatumError::chain_corrupted(
                &self.identifier,
                release.version,
                "version gap is not flagged consistently",
            ));
        }
        if let Some(retracts) = release.retracts() {
            self.check_retraction_target(retracts, self.releases.len())
                .map_err(|reason| DatumError::chain_corrupted(&self.identifier, release.version, reason))?;
        }
        Ok(())
    }

    /// Append a release after validating it extends the tip
    pub fn push(&mut self, release: Release) -> Result<()> {
        self.check_extends(&release)?;
        self.releases.push(release);
        Ok(())
    }

    /// Walk the whole chain, recomputing every hash and link
    ///
    /// Fails with `ChainCorrupted` naming the first offending version.
    pub fn verify(&self) -> Result<()> {
        match self.first_corruption() {
            Some((version, reason)) => Err(DatumError::chain_corrupted(&self.identifier, version, reason)),
            None => Ok(()),
        }
    }

    /// Number of leading releases that verify, plus the first failure if any
    pub fn verified_prefix_len(&self) -> (usize, Option<DatumError>) {
        match self.first_corruption() {
            None => (self.releases.len(), None),
            Some((version, reason)) => {
                let len = self.releases.partition_point(|r| r.version < version);
                (len, Some(DatumError::chain_corrupted(&self.identifier, version, reason)))
            }
        }
    }

    fn first_corruption(&self) -> Option<(u64, String)> {
        let mut prev: Option<&Release> = None;
        for (idx, release) in self.releases.iter().enumerate() {
            let version = release.version;
            if release.identifier != self.identifier {
                return Some((version, format!("release belongs to {}", release.identifier)));
            }
            if !release.has_valid_hash() {
                return Some((version, "release hash does not match its fields".to_string()));
            }
            if release.previous != prev.map(|p| p.hash) {
                return Some((version, "previous-release link is broken".to_string()));
            }
            let prev_version = prev.map(|p| p.version).unwrap_or(0);
            if version <= prev_version {
                return Some((version, format!("version does not advance past {prev_version}")));
            }
            let expected_gap = (version > prev_version + 1).then_some(prev_version);
            if release.gap_from != expected_gap {
                return Some((version, "version gap is not flagged consistently".to_string()));
            }
            if let Some(retracts) = release.retracts() {
                if let Err(reason) = self.check_retraction_target(retracts, idx) {
                    return Some((version, reason));
                }
            }
            prev = Some(release);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use datum_core::fingerprint::fingerprint;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn chain_with(versions: &[u64]) -> VersionChain {
        let mut chain = VersionChain::new(Identifier::parse("acme/report").unwrap());
        for v in versions {
            let r = chain
                .prepare_publication(
                    *v,
                    fingerprint(format!("v{v}").as_bytes()),
                    format!("https://acme.org/r{v}.csv"),
                    ReleaseMetadata::default(),
                    t0(),
                )
                .unwrap();
            chain.push(r).unwrap();
        }
        chain
    }

    #[test]
    fn test_genesis_has_no_previous() {
        let chain = chain_with(&[1]);
        assert!(chain.tip().unwrap().is_genesis());
        assert_eq!(chain.tip_version(), Some(1));
        chain.verify().unwrap();
    }

    #[test]
    fn test_links_follow_previous_hash() {
        let chain = chain_with(&[1, 2, 3]);
        let rs = chain.releases();
        assert_eq!(rs[1].previous, Some(rs[0].hash));
        assert_eq!(rs[2].previous, Some(rs[1].hash));
    }

    #[test]
    fn test_non_increasing_version_conflicts() {
        let chain = chain_with(&[1, 2]);
        for v in [0, 1, 2] {
            let err = chain
                .prepare_publication(v, fingerprint(b"x"), "https://acme.org/x", ReleaseMetadata::default(), t0())
                .unwrap_err();
            assert_matches!(err, DatumError::VersionConflict { .. });
        }
    }

    #[test]
    fn test_gaps_are_flagged() {
        let chain = chain_with(&[1, 5]);
        assert_eq!(chain.get(5).unwrap().gap_from, Some(1));
        assert_eq!(chain.get(1).unwrap().gap_from, None);
        chain.verify().unwrap();

        let gapped_genesis = chain_with(&[3]);
        assert_eq!(gapped_genesis.get(3).unwrap().gap_from, Some(0));
    }

    #[test]
    fn test_tampering_is_reported_at_first_bad_version() {
        let mut chain = chain_with(&[1, 2, 3, 4]);
        chain.releases[1].origin_url = "https://evil.example/r2.csv".to_string();
        let err = chain.verify().unwrap_err();
        assert_matches!(err, DatumError::ChainCorrupted { version: 2, .. });

        let (len, failure) = chain.verified_prefix_len();
        assert_eq!(len, 1);
        assert!(failure.is_some());
    }

    #[test]
    fn test_rehashed_tampering_breaks_following_link() {
        let mut chain = chain_with(&[1, 2, 3]);
        chain.releases[1].origin_url = "https://evil.example/r2.csv".to_string();
        chain.releases[1].hash = chain.releases[1].compute_hash();
        let err = chain.verify().unwrap_err();
        assert_matches!(err, DatumError::ChainCorrupted { version: 3, .. });
    }

    #[test]
    fn test_retraction_appends_tombstone() {
        let mut chain = chain_with(&[1, 2]);
        let tomb = chain.prepare_retraction(1, "incorrect data", t0()).unwrap();
        assert_eq!(tomb.version, 3);
        assert_eq!(tomb.fingerprint, chain.get(1).unwrap().fingerprint);
        chain.push(tomb).unwrap();

        assert!(chain.is_retracted(1));
        assert_eq!(chain.latest_publication().unwrap().version, 2);
        chain.verify().unwrap();

        assert_matches!(
            chain.prepare_retraction(1, "again", t0()),
            Err(DatumError::VersionConflict { .. })
        );
        assert_matches!(
            chain.prepare_retraction(3, "tombstone", t0()),
            Err(DatumError::VersionConflict { .. })
        );
        assert_matches!(chain.prepare_retraction(9, "missing", t0()), Err(DatumError::NotFound { .. }));
    }

    #[test]
    fn test_relation_classification() {
        let chain = chain_with(&[1, 2]);
        let other = chain_with(&[1, 2, 3]);
        assert_eq!(chain.relation(&other.releases()[0]), ReleaseRelation::Known);
        assert_eq!(chain.relation(&other.releases()[2]), ReleaseRelation::Extends);

        let forked = {
            let mut c = chain_with(&[1]);
            let r = c
                .prepare_publication(2, fingerprint(b"fork"), "https://acme.org/fork", ReleaseMetadata::default(), t0())
                .unwrap();
            c.push(r).unwrap();
            c
        };
        assert_matches!(chain.relation(&forked.releases()[1]), ReleaseRelation::Conflicts { .. });

        let far = chain_with(&[1, 2, 3, 4]);
        assert_eq!(chain.relation(&far.releases()[3]), ReleaseRelation::Orphan);
    }

    #[test]
    fn test_releases_after_pages() {
        let chain = chain_with(&[1, 2, 3, 4, 5]);
        let page: Vec<u64> = chain.releases_after(2, 2).iter().map(|r| r.version).collect();
        assert_eq!(page, vec![3, 4]);
        assert!(chain.releases_after(5, 10).is_empty());
    }
}
