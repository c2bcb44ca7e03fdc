//! # Datum Federation
//!
//! Replication of version chains between independent registries.
//!
//! Registries advertise `{identifier, home, tip}` per chain. Comparing a
//! peer's advertisements with the local index tells the
//! [`FederationSynchronizer`] whether to push, pull, or record a divergence.
//! Divergences are surfaced, never resolved: neither chain is overwritten.
//!
//! - [`wire`]: schema-versioned messages
//! - [`compare`]: pure comparison of chains and tips
//! - [`FederationHandler`]: serving side of pull and push
//! - [`PeerTransport`]: seam to the network, with an in-process loopback
//! - [`DivergencePolicy`]: pluggable reaction to divergence

#![forbid(unsafe_code)]

pub mod compare;
pub mod handler;
pub mod policy;
pub mod synchronizer;
pub mod transport;
pub mod wire;

pub use compare::{compare, first_divergence, SyncState};
pub use handler::FederationHandler;
pub use policy::{DivergenceAction, DivergencePolicy, RecordAndSurface};
pub use synchronizer::{DivergenceReport, FederationSynchronizer, SyncFailure, SyncReport};
pub use transport::{LoopbackTransport, PeerTransport, SharedTransport};
pub use wire::{
    Advertisement, AdvertisementSet, PullRequest, PullResponse, PushAck, PushMessage, WireEnvelope,
    FEDERATION_SCHEMA_VERSION,
};
