//! # Datum Registry
//!
//! The per-instance registry: an index from identifiers to version chains,
//! the chain manager that appends to chains homed here, and the submission
//! service that turns a publisher's origin URL into a fingerprinted release.
//!
//! - [`RegistryIndex`]: lookups, local and replicated writes, backfill
//! - [`ChainManager`]: optimistic append, retract and verify
//! - [`PublishService`]: fetch, fingerprint and append a submission
//! - history paging and the catalog live on the index as extra `impl` blocks

#![forbid(unsafe_code)]

pub mod authority;
pub mod catalog;
pub mod history;
pub mod index;
pub mod manager;
pub mod publish;

pub use authority::{AllowAll, NamespaceAuthority, StaticAuthority};
pub use catalog::{CatalogEntry, CatalogPage, CatalogQuery, RegistryStats, Suggestion};
pub use history::{HistoryCursor, HistoryPage};
pub use index::{BackfillRequest, ChainSummary, IngestOutcome, RegistryIndex, Resolution};
pub use manager::ChainManager;
pub use publish::{PublishService, RetractRequest, Submission};
