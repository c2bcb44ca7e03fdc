//! # Datum Core - Foundation Types
//!
//! Pure, synchronous building blocks shared by every Datum crate:
//!
//! - **Fingerprints**: algorithm-tagged content digests with streaming support
//! - **Identifiers**: permanent `namespace/slug` dataset addresses
//! - **Releases**: hash-chained version entries
//! - **Errors**: the unified [`DatumError`] taxonomy
//! - **Configuration**: TOML + environment configuration and retry policy
//!
//! Nothing here performs network or storage I/O; those concerns live in
//! `datum-store`, `datum-fetch` and `datum-federation`.

#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod identifiers;
pub mod release;
pub mod retry;
pub mod time;

pub use config::DatumConfig;
pub use errors::{DatumError, ErrorCategory, Result};
pub use fingerprint::{DigestAlgorithm, Fingerprint, FingerprintEngine};
pub use identifiers::{Identifier, IdentifierRef, RegistryId, VersionSelector};
pub use release::{ChainHash, Release, ReleaseDraft, ReleaseKind, ReleaseMetadata};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use time::{Clock, ManualClock, SystemClock};
