//! Unified error type for Datum
//!
//! Every registry operation reports failures through [`DatumError`]. The
//! variants follow the registry taxonomy: validation failures go back to the
//! caller, transient failures are retried locally, and integrity failures are
//! recorded and surfaced without any automatic resolution.

use serde::{Deserialize, Serialize};

/// How a failure should be handled by the layer that observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input; returned to the caller for correction
    Validation,
    /// Conflicts with existing state; returned to the caller
    Conflict,
    /// Requested entity does not exist
    NotFound,
    /// May succeed if retried after a delay
    Transient,
    /// Tamper-evidence violation; recorded and surfaced, never auto-resolved
    Integrity,
    /// Infrastructure failure inside the registry
    Internal,
}

/// Unified error type for all Datum operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DatumError {
    /// Input did not parse or violated syntax rules
    #[error("Invalid format: {message}")]
    InvalidFormat {
        /// Description of the malformed input
        message: String,
    },

    /// Identifier is already registered
    #[error("Already exists: {identifier}")]
    AlreadyExists {
        /// The identifier that is taken
        identifier: String,
    },

    /// Declared version does not advance the chain
    #[error("Version conflict on {identifier} at version {declared}: {reason}")]
    VersionConflict {
        /// Identifier whose chain rejected the release
        identifier: String,
        /// Version the caller asked for
        declared: u64,
        /// Current tip version, if the chain is not empty
        tip: Option<u64>,
        /// Why the version was rejected
        reason: String,
    },

    /// Optimistic append lost every retry against concurrent writers
    #[error("Concurrent modification of {identifier} after {attempts} attempts")]
    ConcurrentModification {
        /// Identifier under contention
        identifier: String,
        /// Number of attempts made before giving up
        attempts: u32,
    },

    /// Fingerprint string or bytes are malformed
    #[error("Invalid fingerprint: {message}")]
    InvalidFingerprint {
        /// What is wrong with the fingerprint
        message: String,
    },

    /// A stored chain failed hash verification
    #[error("Chain corrupted for {identifier} at version {version}: {reason}")]
    ChainCorrupted {
        /// Identifier whose chain is corrupted
        identifier: String,
        /// First version that failed verification
        version: u64,
        /// What check failed
        reason: String,
    },

    /// A release references a predecessor that is not held locally
    #[error("Unknown ancestor for {identifier} version {version}: previous hash {previous}")]
    UnknownAncestor {
        /// Identifier of the orphaned release
        identifier: String,
        /// Version of the orphaned release
        version: u64,
        /// Hex of the missing previous-release hash
        previous: String,
    },

    /// Two registries hold different releases at the same version
    #[error("Chain divergence for {identifier} at version {version}: local {local_hash}, remote {remote_hash}")]
    ChainDivergence {
        /// Identifier with conflicting histories
        identifier: String,
        /// Version at which the histories differ
        version: u64,
        /// Hash held locally
        local_hash: String,
        /// Hash offered by the peer
        remote_hash: String,
    },

    /// Resource not found
    #[error("Not found: {message}")]
    NotFound {
        /// What was not found
        message: String,
    },

    /// Origin could not be reached or refused to serve the content
    #[error("Fetch error for {url}: {message}")]
    FetchError {
        /// Origin location
        url: String,
        /// Failure description
        message: String,
        /// Whether another attempt may succeed
        retryable: bool,
    },

    /// Origin served bytes whose fingerprint differs from the recorded one
    #[error("Integrity violation for {url}: expected {expected}, got {actual}")]
    IntegrityViolation {
        /// Origin location
        url: String,
        /// Fingerprint recorded in the registry
        expected: String,
        /// Fingerprint of the bytes actually served
        actual: String,
    },

    /// A write was attempted on a registry that is not the identifier's home
    #[error("Registry is not home for {identifier} (home is {home})")]
    NotHome {
        /// Identifier being written
        identifier: String,
        /// The identifier's home registry
        home: String,
    },

    /// Sync was attempted from a registry without a verified full chain
    #[error("Unverified sync source {registry} for {identifier}")]
    UnverifiedSource {
        /// Identifier being synchronized
        identifier: String,
        /// Registry offering the partial chain
        registry: String,
    },

    /// The namespace authority refused a write under a namespace
    #[error("Not authorized for namespace '{namespace}': {reason}")]
    Unauthorized {
        /// Namespace written to
        namespace: String,
        /// Why the authority refused
        reason: String,
    },

    /// Persistence layer failure
    #[error("Storage error: {message}")]
    Storage {
        /// Storage failure description
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Serialization failure description
        message: String,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    Config {
        /// Configuration failure description
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Internal failure description
        message: String,
    },
}

impl DatumError {
    /// Create an invalid format error
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(identifier: impl ToString) -> Self {
        Self::AlreadyExists {
            identifier: identifier.to_string(),
        }
    }

    /// Create a version conflict error
    pub fn version_conflict(
        identifier: impl ToString,
        declared: u64,
        tip: Option<u64>,
        reason: impl Into<String>,
    ) -> Self {
        Self::VersionConflict {
            identifier: identifier.to_string(),
            declared,
            tip,
            reason: reason.into(),
        }
    }

    /// Create a concurrent modification error
    pub fn concurrent_modification(identifier: impl ToString, attempts: u32) -> Self {
        Self::ConcurrentModification {
            identifier: identifier.to_string(),
            attempts,
        }
    }

    /// Create an invalid fingerprint error
    pub fn invalid_fingerprint(message: impl Into<String>) -> Self {
        Self::InvalidFingerprint {
            message: message.into(),
        }
    }

    /// Create a chain corruption error
    pub fn chain_corrupted(identifier: impl ToString, version: u64, reason: impl Into<String>) -> Self {
        Self::ChainCorrupted {
            identifier: identifier.to_string(),
            version,
            reason: reason.into(),
        }
    }

    /// Create an unknown ancestor error
    pub fn unknown_ancestor(identifier: impl ToString, version: u64, previous: impl ToString) -> Self {
        Self::UnknownAncestor {
            identifier: identifier.to_string(),
            version,
            previous: previous.to_string(),
        }
    }

    /// Create a chain divergence error
    pub fn chain_divergence(
        identifier: impl ToString,
        version: u64,
        local_hash: impl ToString,
        remote_hash: impl ToString,
    ) -> Self {
        Self::ChainDivergence {
            identifier: identifier.to_string(),
            version,
            local_hash: local_hash.to_string(),
            remote_hash: remote_hash.to_string(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a fetch error that may be retried
    pub fn fetch_transient(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FetchError {
            url: url.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a fetch error that will not succeed on retry
    pub fn fetch_permanent(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FetchError {
            url: url.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Create an integrity violation error
    pub fn integrity_violation(
        url: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::IntegrityViolation {
            url: url.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a not-home error
    pub fn not_home(identifier: impl ToString, home: impl ToString) -> Self {
        Self::NotHome {
            identifier: identifier.to_string(),
            home: home.to_string(),
        }
    }

    /// Create an unverified source error
    pub fn unverified_source(identifier: impl ToString, registry: impl ToString) -> Self {
        Self::UnverifiedSource {
            identifier: identifier.to_string(),
            registry: registry.to_string(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized(namespace: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            namespace: namespace.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable machine-readable code, identical to the serialized `code` tag
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat { .. } => "invalid_format",
            Self::AlreadyExists { .. } => "already_exists",
            Self::VersionConflict { .. } => "version_conflict",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::InvalidFingerprint { .. } => "invalid_fingerprint",
            Self::ChainCorrupted { .. } => "chain_corrupted",
            Self::UnknownAncestor { .. } => "unknown_ancestor",
            Self::ChainDivergence { .. } => "chain_divergence",
            Self::NotFound { .. } => "not_found",
            Self::FetchError { .. } => "fetch_error",
            Self::IntegrityViolation { .. } => "integrity_violation",
            Self::NotHome { .. } => "not_home",
            Self::UnverifiedSource { .. } => "unverified_source",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Storage { .. } => "storage",
            Self::Serialization { .. } => "serialization",
            Self::Config { .. } => "config",
            Self::Internal { .. } => "internal",
        }
    }

    /// Handling category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidFormat { .. } | Self::InvalidFingerprint { .. } | Self::Config { .. } => {
                ErrorCategory::Validation
            }
            Self::AlreadyExists { .. }
            | Self::VersionConflict { .. }
            | Self::UnknownAncestor { .. }
            | Self::NotHome { .. }
            | Self::UnverifiedSource { .. }
            | Self::Unauthorized { .. } => ErrorCategory::Conflict,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::ConcurrentModification { .. } | Self::FetchError { .. } => {
                ErrorCategory::Transient
            }
            Self::ChainCorrupted { .. }
            | Self::ChainDivergence { .. }
            | Self::IntegrityViolation { .. } => ErrorCategory::Integrity,
            Self::Storage { .. } | Self::Serialization { .. } | Self::Internal { .. } => {
                ErrorCategory::Internal
            }
        }
    }

    /// Whether a local retry with backoff may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::FetchError { retryable, .. } => *retryable,
            Self::ConcurrentModification { .. } => true,
            _ => false,
        }
    }

    /// Whether this error signals a tamper-evidence violation
    pub fn is_integrity_failure(&self) -> bool {
        self.category() == ErrorCategory::Integrity
    }
}

/// Standard Result type for Datum operations
pub type Result<T> = std::result::Result<T, DatumError>;

impl From<std::io::Error> for DatumError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::storage(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DatumError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DatumError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}
