//! Federation wire format
//!
//! Every message travels inside a [`WireEnvelope`] carrying the schema
//! version. Receivers refuse envelopes from a newer schema than they speak.

use datum_core::{ChainHash, DatumError, Identifier, RegistryId, Release, Result};
use datum_journal::RecordStatus;
use datum_registry::ChainSummary;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Schema version spoken by this build
pub const FEDERATION_SCHEMA_VERSION: u16 = 1;

/// What a registry holds for one identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Identifier
    pub identifier: Identifier,
    /// Home registry of the chain
    pub home: RegistryId,
    /// Tip version
    pub tip_version: u64,
    /// Tip hash
    pub tip_hash: Option<ChainHash>,
    /// Whether the advertiser holds the full chain and it verifies
    pub verified_full_chain: bool,
    /// Lifecycle status as the advertiser knows it
    #[serde(default)]
    pub status: RecordStatus,
}

impl Advertisement {
    /// Whether a registry advertising this may act as a sync source
    pub fn is_eligible_source(&self, advertiser: RegistryId) -> bool {
        self.home == advertiser || self.verified_full_chain
    }
}

impl From<ChainSummary> for Advertisement {
    fn from(summary: ChainSummary) -> Self {
        Self {
            identifier: summary.identifier,
            home: summary.home,
            tip_version: summary.tip_version,
            tip_hash: summary.tip_hash,
            verified_full_chain: summary.verified_full_chain,
            status: summary.status,
        }
    }
}

/// All advertisements of one registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementSet {
    /// Advertising registry
    pub registry: RegistryId,
    /// One entry per identifier
    pub advertisements: Vec<Advertisement>,
}

/// Request for releases after a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Requesting registry
    pub registry: RegistryId,
    /// Identifier wanted
    pub identifier: Identifier,
    /// Releases with a greater version are returned
    pub from_version: u64,
    /// Most releases wanted
    pub limit: usize,
}

/// Releases answering a [`PullRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Identifier
    pub identifier: Identifier,
    /// Home registry of the chain
    pub home: RegistryId,
    /// Releases oldest first
    pub releases: Vec<Release>,
    /// Whether more releases follow the last one
    pub has_more: bool,
    /// Lifecycle status as the responder knows it
    #[serde(default)]
    pub status: RecordStatus,
}

/// Releases sent unasked to a peer that is behind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Sending registry
    pub registry: RegistryId,
    /// Identifier
    pub identifier: Identifier,
    /// Home registry of the chain
    pub home: RegistryId,
    /// Whether the sender holds the full verified chain
    pub verified_full_chain: bool,
    /// Lifecycle status as the sender knows it
    #[serde(default)]
    pub status: RecordStatus,
    /// Releases oldest first
    pub releases: Vec<Release>,
}

/// Receiver's answer to a [`PushMessage`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Receiving registry
    pub registry: RegistryId,
    /// Identifier
    pub identifier: Identifier,
    /// Versions appended, including parked releases they unblocked
    pub applied: Vec<u64>,
    /// Releases the receiver already held
    pub already_known: usize,
    /// Receiver's tip after processing
    pub tip_version: u64,
    /// Receiver's tip hash after processing
    pub tip_hash: Option<ChainHash>,
    /// Why processing stopped early
    pub rejected: Option<DatumError>,
}

/// Schema-versioned wrapper for every federation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope<T> {
    /// Schema version of the payload
    pub schema_version: u16,
    /// Message
    pub payload: T,
}

impl<T> WireEnvelope<T> {
    /// Wrap a payload with the current schema version
    pub fn new(payload: T) -> Self {
        Self {
            schema_version: FEDERATION_SCHEMA_VERSION,
            payload,
        }
    }

    /// Unwrap, refusing envelopes from a newer schema
    pub fn into_payload(self) -> Result<T> {
        if self.schema_version > FEDERATION_SCHEMA_VERSION {
            return Err(DatumError::invalid_format(format!(
                "unsupported federation schema version {} (speaking {FEDERATION_SCHEMA_VERSION})",
                self.schema_version
            )));
        }
        Ok(self.payload)
    }
}

/// Encode a payload in an envelope
pub fn encode<T: Serialize>(payload: T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&WireEnvelope::new(payload))?)
}

/// Decode an envelope and unwrap its payload
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let envelope: WireEnvelope<T> = serde_json::from_slice(bytes)?;
    envelope.into_payload()
}
