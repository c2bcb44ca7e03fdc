//! Publisher submissions
//!
//! A submission names an origin URL and a declared version. The service
//! fetches the bytes, fingerprints them and appends a release, registering
//! the identifier on first use.

use std::sync::Arc;
use std::time::Duration;

use datum_core::{DatumError, DigestAlgorithm, Fingerprint, Identifier, Release, ReleaseMetadata, Result};
use datum_fetch::FetchClient;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::index::RegistryIndex;
use crate::manager::ChainManager;

/// A publisher's request to publish a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Publisher namespace
    pub namespace: String,
    /// Dataset slug
    pub slug: String,
    /// Where the bytes live
    pub origin_url: String,
    /// Declared version
    pub version: u64,
    /// Descriptive metadata
    #[serde(default)]
    pub metadata: Option<ReleaseMetadata>,
    /// Fingerprint the publisher expects the origin to serve
    #[serde(default)]
    pub expected_fingerprint: Option<Fingerprint>,
}

/// A publisher's request to retract a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetractRequest {
    /// Version to retract
    pub version: u64,
    /// Why
    pub reason: String,
}

/// Turns submissions into releases
#[derive(Debug, Clone)]
pub struct PublishService {
    manager: ChainManager,
    fetch: FetchClient,
    algorithm: DigestAlgorithm,
    deadline: Option<Duration>,
}

impl PublishService {
    /// Service appending through `manager` and reading origins with `fetch`
    pub fn new(manager: ChainManager, fetch: FetchClient, algorithm: DigestAlgorithm) -> Self {
        Self {
            manager,
            fetch,
            algorithm,
            deadline: None,
        }
    }

    /// Deadline for each origin fetch
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Index behind the service
    pub fn index(&self) -> &Arc<RegistryIndex> {
        self.manager.index()
    }

    /// Publish a submission
    ///
    /// Cheap checks run before the origin is contacted: identifier syntax,
    /// home registry, retirement and the declared version against the tip.
    pub async fn submit(&self, submission: Submission) -> Result<Release> {
        let identifier = Identifier::new(&submission.namespace, &submission.slug)?;
        let index = self.index();

        if index.store().load(&identifier).await?.is_none() {
            match index.register(identifier.namespace(), identifier.slug()).await {
                Ok(_) | Err(DatumError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let record = index.writable_record(&identifier, submission.version).await?;
        if let Some(tip) = record.chain.tip_version() {
            if submission.version <= tip {
                return Err(DatumError::version_conflict(
                    &identifier,
                    submission.version,
                    Some(tip),
                    format!("version must be greater than current tip {tip}"),
                ));
            }
        }

        let algorithm = submission
            .expected_fingerprint
            .as_ref()
            .map_or(self.algorithm, Fingerprint::algorithm);
        let digest = self
            .fetch
            .fingerprint_origin(&submission.origin_url, algorithm, self.deadline)
            .await?;

        if let Some(expected) = &submission.expected_fingerprint {
            if *expected != digest.fingerprint {
                return Err(DatumError::integrity_violation(
                    &submission.origin_url,
                    expected,
                    &digest.fingerprint,
                ));
            }
        }

        let mut metadata = submission.metadata.unwrap_or_default();
        metadata.size.get_or_insert(digest.size);

        let release = self
            .manager
            .append(&identifier, submission.version, digest.fingerprint, &submission.origin_url, metadata)
            .await?;
        info!(
            identifier = %identifier,
            version = release.version,
            fingerprint = %release.fingerprint,
            "submission accepted"
        );
        Ok(release)
    }

    /// Retract a version
    pub async fn retract(&self, identifier: &Identifier, request: RetractRequest) -> Result<Release> {
        self.manager.retract(identifier, request.version, &request.reason).await
    }
}
