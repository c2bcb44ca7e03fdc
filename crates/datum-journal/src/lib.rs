//! # Datum Journal
//!
//! Append-only, hash-linked version history for dataset identifiers.
//!
//! [`VersionChain`] holds the pure chain rules (ordering, linking, gaps,
//! retraction tombstones and full verification). [`RegistryRecord`] wraps a
//! chain with the per-registry bookkeeping that federation needs.

#![forbid(unsafe_code)]

pub mod chain;
pub mod record;

pub use chain::{ReleaseRelation, VersionChain};
pub use record::{IntegrityFlag, RecordStatus, RegistryRecord, SyncCheckpoint};
