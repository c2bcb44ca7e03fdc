//! Registry configuration
//!
//! Configuration is read from a TOML file, then overridden by `DATUM_*`
//! environment variables, then validated. Every section has defaults so an
//! empty file is a valid single-registry setup.
//!
//! ```toml
//! [registry]
//! name = "datum-eu"
//! bind_address = "0.0.0.0:7070"
//!
//! [fingerprint]
//! algorithm = "blake3"
//!
//! [sync]
//! interval_secs = 30
//!
//! [[sync.peers]]
//! id = "6f2d1c9e-0000-0000-0000-000000000001"
//! url = "https://registry.example.org"
//! ```

use crate::errors::{DatumError, Result};
use crate::fingerprint::DigestAlgorithm;
use crate::identifiers::RegistryId;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "DATUM_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatumConfig {
    /// This registry's identity and surface
    pub registry: RegistrySection,
    /// Content fingerprinting
    pub fingerprint: FingerprintSection,
    /// Version chain behavior
    pub chain: ChainSection,
    /// Origin fetching
    pub fetch: FetchSection,
    /// Federation synchronization
    pub sync: SyncSection,
}

/// Registry identity and surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Stable registry id; generated and persisted on first start when absent
    pub id: Option<RegistryId>,
    /// Human-readable name used in logs
    pub name: String,
    /// Directory holding registry records
    pub data_dir: PathBuf,
    /// HTTP bind address
    pub bind_address: String,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            id: None,
            name: "datum".to_string(),
            data_dir: PathBuf::from(".datum"),
            bind_address: "127.0.0.1:7070".to_string(),
        }
    }
}

/// Content fingerprinting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintSection {
    /// Algorithm for new fingerprints
    pub algorithm: DigestAlgorithm,
}

/// Version chain behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    /// Backoff for optimistic append retries
    pub append_retry: RetryPolicy,
    /// Maximum out-of-order releases queued per identifier
    pub pending_queue_limit: usize,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            append_retry: RetryPolicy::exponential()
                .with_max_retries(5)
                .with_initial_delay(Duration::from_millis(5))
                .with_max_delay(Duration::from_millis(200))
                .with_jitter(),
            pending_queue_limit: 64,
        }
    }
}

/// Origin fetching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    /// Backoff for transient origin failures
    pub retry: RetryPolicy,
    /// Overall deadline for one fetch, in milliseconds
    pub timeout_ms: u64,
    /// Abort downloads larger than this many bytes
    pub max_content_bytes: Option<u64>,
    /// User-Agent sent to origins
    pub user_agent: String,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::exponential().with_max_retries(4).with_jitter(),
            timeout_ms: 120_000,
            max_content_bytes: None,
            user_agent: format!("datum-registry/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl FetchSection {
    /// Fetch deadline as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A federated peer registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Peer registry id
    pub id: RegistryId,
    /// Base URL of the peer's HTTP surface
    pub url: String,
}

/// Federation synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Run the periodic synchronizer
    pub enabled: bool,
    /// Seconds between sync rounds
    pub interval_secs: u64,
    /// Deadline for one exchange with one peer, in milliseconds
    pub request_timeout_ms: u64,
    /// Maximum releases carried by one push or pull
    pub max_releases_per_message: usize,
    /// Backoff for failed peer exchanges
    pub retry: RetryPolicy,
    /// Peer registries
    pub peers: Vec<PeerEntry>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            request_timeout_ms: 30_000,
            max_releases_per_message: 256,
            retry: RetryPolicy::exponential(),
            peers: Vec::new(),
        }
    }
}

impl SyncSection {
    /// Interval between sync rounds
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Per-peer exchange deadline
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl DatumConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DatumError::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Apply `DATUM_*` overrides from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply `DATUM_*` overrides from an explicit variable list
    ///
    /// `DATUM_SYNC_INTERVAL_SECS=30` sets `sync.interval_secs`. Unknown keys
    /// are ignored.
    pub fn merge_with_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let rest = rest.to_ascii_lowercase();
            let Some((section, field)) = rest.split_once('_') else {
                continue;
            };
            if self.set_from_string(&format!("{section}.{field}"), &value)? {
                tracing::debug!(key = %key, "applied configuration override");
            }
        }
        Ok(())
    }

    /// Set a single `section.field` value; returns whether the key is known
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<bool> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .parse()
                .map_err(|e| DatumError::config(format!("{key}: invalid value '{value}': {e}")))
        }

        match key {
            "registry.id" => self.registry.id = Some(parse(key, value)?),
            "registry.name" => self.registry.name = value.to_string(),
            "registry.data_dir" => self.registry.data_dir = PathBuf::from(value),
            "registry.bind_address" => self.registry.bind_address = value.to_string(),
            "fingerprint.algorithm" => self.fingerprint.algorithm = parse(key, value)?,
            "chain.pending_queue_limit" => self.chain.pending_queue_limit = parse(key, value)?,
            "fetch.timeout_ms" => self.fetch.timeout_ms = parse(key, value)?,
            "fetch.max_content_bytes" => self.fetch.max_content_bytes = Some(parse(key, value)?),
            "fetch.max_retries" => self.fetch.retry.max_retries = parse(key, value)?,
            "sync.enabled" => self.sync.enabled = parse(key, value)?,
            "sync.interval_secs" => self.sync.interval_secs = parse(key, value)?,
            "sync.request_timeout_ms" => self.sync.request_timeout_ms = parse(key, value)?,
            "sync.max_releases_per_message" => {
                self.sync.max_releases_per_message = parse(key, value)?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Check invariants the rest of the system relies on
    pub fn validate(&self) -> Result<()> {
        if self.registry.bind_address.trim().is_empty() {
            return Err(DatumError::config("registry.bind_address must not be empty"));
        }
        if self.sync.interval_secs == 0 {
            return Err(DatumError::config("sync.interval_secs must be at least 1"));
        }
        if self.sync.max_releases_per_message == 0 {
            return Err(DatumError::config("sync.max_releases_per_message must be at least 1"));
        }
        if self.fetch.timeout_ms == 0 {
            return Err(DatumError::config("fetch.timeout_ms must be at least 1"));
        }
        if self.chain.pending_queue_limit == 0 {
            return Err(DatumError::config("chain.pending_queue_limit must be at least 1"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for peer in &self.sync.peers {
            if Some(peer.id) == self.registry.id {
                return Err(DatumError::config(format!("peer {} is this registry", peer.id)));
            }
            if !seen.insert(peer.id) {
                return Err(DatumError::config(format!("peer {} listed twice", peer.id)));
            }
            url::Url::parse(&peer.url)
                .map_err(|e| DatumError::config(format!("peer {} url '{}': {e}", peer.id, peer.url)))?;
        }
        Ok(())
    }
}
