//! Releases and the chain-of-custody hash
//!
//! A [`Release`] binds one version of an identifier to a fingerprint, an
//! origin URL and a publication time, and links to its predecessor by hash.
//! The release hash covers every field plus the previous hash, so altering
//! any historical release changes every hash after it.
//!
//! Field encoding for the hash is canonical: a domain tag followed by each
//! field as a length-prefixed byte string, in declaration order. The chain
//! always hashes with [`CHAIN_ALGORITHM`], independent of the fingerprint
//! algorithm a publisher chose for the content.

use crate::errors::{DatumError, Result};
use crate::fingerprint::{DigestAlgorithm, Fingerprint, Hasher};
use crate::identifiers::Identifier;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Algorithm used for release chain hashes
pub const CHAIN_ALGORITHM: DigestAlgorithm = DigestAlgorithm::Sha256;

const RELEASE_DOMAIN: &[u8] = b"datum.release.v1";

/// Hash of one release, linking it into its chain
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainHash(pub [u8; 32]);

impl ChainHash {
    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short prefix for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainHash({})", self.short())
    }
}

impl FromStr for ChainHash {
    type Err = DatumError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| DatumError::invalid_format(format!("chain hash '{s}': {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DatumError::invalid_format(format!("chain hash '{s}' must be 32 bytes")))?;
        Ok(Self(arr))
    }
}

impl Serialize for ChainHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChainHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// What a release records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReleaseKind {
    /// A new version of the dataset
    Publication,
    /// Tombstone withdrawing an earlier publication
    Retraction {
        /// Version being retracted
        retracts: u64,
        /// Publisher-supplied reason
        reason: String,
    },
}

/// Descriptive metadata attached to a publication
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    /// Human-readable title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Longer description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// License identifier, e.g. `CC-BY-4.0`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Free-form tags used by catalog search
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Content format, e.g. `csv`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Size in bytes observed at publication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// All release fields except the hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDraft {
    /// Dataset the release belongs to
    pub identifier: Identifier,
    /// Version number
    pub version: u64,
    /// Publication or retraction
    pub kind: ReleaseKind,
    /// Content fingerprint
    pub fingerprint: Fingerprint,
    /// Origin location at publication time
    pub origin_url: String,
    /// Publication timestamp
    pub published_at: DateTime<Utc>,
    /// Hash of the preceding release; `None` for genesis
    pub previous: Option<ChainHash>,
    /// Previous tip version when this release skips version numbers
    pub gap_from: Option<u64>,
    /// Descriptive metadata
    pub metadata: ReleaseMetadata,
}

impl ReleaseDraft {
    /// Compute the hash and produce an immutable release
    pub fn seal(self) -> Release {
        let hash = hash_release_fields(&self);
        Release {
            identifier: self.identifier,
            version: self.version,
            kind: self.kind,
            fingerprint: self.fingerprint,
            origin_url: self.origin_url,
            published_at: self.published_at,
            previous: self.previous,
            gap_from: self.gap_from,
            metadata: self.metadata,
            hash,
        }
    }
}

/// One immutable entry in a version chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Dataset the release belongs to
    pub identifier: Identifier,
    /// Version number, strictly increasing along the chain
    pub version: u64,
    /// Publication or retraction
    pub kind: ReleaseKind,
    /// Content fingerprint
    pub fingerprint: Fingerprint,
    /// Origin location at publication time
    pub origin_url: String,
    /// Publication timestamp
    pub published_at: DateTime<Utc>,
    /// Hash of the preceding release; `None` for genesis
    pub previous: Option<ChainHash>,
    /// Previous tip version when this release skips version numbers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_from: Option<u64>,
    /// Descriptive metadata
    #[serde(default)]
    pub metadata: ReleaseMetadata,
    /// Hash over all fields above
    pub hash: ChainHash,
}

impl Release {
    /// Recompute the hash from the stored fields
    pub fn compute_hash(&self) -> ChainHash {
        hash_release_fields(&self.as_draft())
    }

    /// Whether the stored hash matches the stored fields
    pub fn has_valid_hash(&self) -> bool {
        self.compute_hash() == self.hash
    }

    /// Whether this is the first release of its chain
    pub fn is_genesis(&self) -> bool {
        self.previous.is_none()
    }

    /// Whether this release is a retraction tombstone
    pub fn is_tombstone(&self) -> bool {
        matches!(self.kind, ReleaseKind::Retraction { .. })
    }

    /// Version retracted by this tombstone
    pub fn retracts(&self) -> Option<u64> {
        match self.kind {
            ReleaseKind::Retraction { retracts, .. } => Some(retracts),
            ReleaseKind::Publication => None,
        }
    }

    /// Copy of the fields without the hash
    pub fn as_draft(&self) -> ReleaseDraft {
        ReleaseDraft {
            identifier: self.identifier.clone(),
            version: self.version,
            kind: self.kind.clone(),
            fingerprint: self.fingerprint.clone(),
            origin_url: self.origin_url.clone(),
            published_at: self.published_at,
            previous: self.previous,
            gap_from: self.gap_from,
            metadata: self.metadata.clone(),
        }
    }
}

struct FieldWriter {
    hasher: Box<dyn Hasher>,
}

impl FieldWriter {
    fn new() -> Self {
        let mut hasher = CHAIN_ALGORITHM.implementation().hasher();
        hasher.update(RELEASE_DOMAIN);
        Self { hasher }
    }

    fn bytes(&mut self, data: &[u8]) {
        self.hasher.update(&(data.len() as u64).to_be_bytes());
        self.hasher.update(data);
    }

    fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.bytes(&v.to_be_bytes());
    }

    fn opt_str(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.hasher.update(&[1]);
                self.str(s);
            }
            None => self.hasher.update(&[0]),
        }
    }

    fn opt_u64(&mut self, v: Option<u64>) {
        match v {
            Some(v) => {
                self.hasher.update(&[1]);
                self.u64(v);
            }
            None => self.hasher.update(&[0]),
        }
    }

    fn finish(self) -> ChainHash {
        let digest = self.hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..32]);
        ChainHash(out)
    }
}

fn hash_release_fields(draft: &ReleaseDraft) -> ChainHash {
    let mut w = FieldWriter::new();
    w.str(draft.identifier.namespace());
    w.str(draft.identifier.slug());
    w.u64(draft.version);
    match &draft.kind {
        ReleaseKind::Publication => w.u64(0),
        ReleaseKind::Retraction { retracts, reason } => {
            w.u64(1);
            w.u64(*retracts);
            w.str(reason);
        }
    }
    w.str(&draft.fingerprint.to_string());
    w.str(&draft.origin_url);
    w.str(&draft.published_at.to_rfc3339_opts(SecondsFormat::Nanos, true));
    match &draft.previous {
        Some(prev) => {
            w.hasher.update(&[1]);
            w.bytes(&prev.0);
        }
        None => w.hasher.update(&[0]),
    }
    w.opt_u64(draft.gap_from);

    let meta = &draft.metadata;
    w.opt_str(meta.title.as_deref());
    w.opt_str(meta.description.as_deref());
    w.opt_str(meta.license.as_deref());
    w.u64(meta.tags.len() as u64);
    for tag in &meta.tags {
        w.str(tag);
    }
    w.opt_str(meta.format.as_deref());
    w.opt_u64(meta.size);
    w.finish()
}
