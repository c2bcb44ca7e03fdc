//! Node assembly
//!
//! Wires configuration into a running registry: record store, index,
//! submission service, federation handler and synchronizer, HTTP router.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use datum_core::{DatumConfig, DatumError, RegistryId, Result};
use datum_federation::{FederationHandler, FederationSynchronizer};
use datum_fetch::FetchClient;
use datum_registry::{ChainManager, PublishService, RegistryIndex};
use datum_store::{FileRecordStore, RecordStore};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{router, AppState};
use crate::peer::HttpPeerTransport;

const REGISTRY_ID_FILE: &str = "registry.id";
const RECORDS_DIR: &str = "records";

/// A fully assembled registry
pub struct DatumNode {
    config: DatumConfig,
    state: AppState,
}

impl std::fmt::Debug for DatumNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatumNode")
            .field("registry", &self.id())
            .field("name", &self.config.registry.name)
            .finish_non_exhaustive()
    }
}

impl DatumNode {
    /// Open the registry described by `config`, backed by files under its data directory
    pub async fn open(config: DatumConfig) -> Result<Self> {
        config.validate()?;
        let data_dir = config.registry.data_dir.clone();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| DatumError::storage(format!("cannot create {}: {e}", data_dir.display())))?;

        let id = match config.registry.id {
            Some(id) => id,
            None => load_or_create_registry_id(&data_dir).await?,
        };
        let store = Arc::new(FileRecordStore::open(data_dir.join(RECORDS_DIR)).await?);
        let fetch = FetchClient::from_config(&config.fetch)?;
        Self::assemble(config, id, store, fetch).await
    }

    /// Assemble a node over an explicit store and fetch client
    pub async fn assemble(
        config: DatumConfig,
        id: RegistryId,
        store: Arc<dyn RecordStore>,
        fetch: FetchClient,
    ) -> Result<Self> {
        let index = Arc::new(RegistryIndex::new(id, store).with_pending_limit(config.chain.pending_queue_limit));
        let manager = ChainManager::new(index.clone()).with_retry(config.chain.append_retry.clone());
        let publish =
            PublishService::new(manager, fetch, config.fingerprint.algorithm).with_deadline(config.fetch.timeout());
        let federation = FederationHandler::new(index.clone(), config.sync.max_releases_per_message);

        let sync = if config.sync.enabled {
            let sync = FederationSynchronizer::from_config(index.clone(), &config.sync);
            for peer in &config.sync.peers {
                let transport = HttpPeerTransport::new(
                    peer.id,
                    &peer.url,
                    config.sync.request_timeout(),
                    &config.fetch.user_agent,
                )?;
                sync.add_peer(Arc::new(transport)).await;
            }
            Some(Arc::new(sync))
        } else {
            None
        };

        info!(
            registry = %id,
            name = %config.registry.name,
            algorithm = config.fingerprint.algorithm.name(),
            peers = config.sync.peers.len(),
            federation = config.sync.enabled,
            "registry assembled"
        );
        Ok(Self {
            config,
            state: AppState {
                publish,
                federation,
                sync,
            },
        })
    }

    /// This registry's id
    pub fn id(&self) -> RegistryId {
        self.state.publish.index().local_id()
    }

    /// The registry index
    pub fn index(&self) -> &Arc<RegistryIndex> {
        self.state.publish.index()
    }

    /// The synchronizer, when federation is enabled
    pub fn synchronizer(&self) -> Option<&Arc<FederationSynchronizer>> {
        self.state.sync.as_ref()
    }

    /// HTTP router for this node
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve HTTP and run the synchronizer until `shutdown` fires
    pub async fn serve(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let addr: SocketAddr = self.config.registry.bind_address.parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!(registry = %self.id(), %addr, "serving registry");

        let sync_task = match &self.state.sync {
            Some(sync) if !self.config.sync.peers.is_empty() => {
                Some(tokio::spawn(sync.clone().run(shutdown.child_token())))
            }
            Some(_) => {
                info!("no peers configured; synchronizer idle");
                None
            }
            None => None,
        };

        let app = self.router();
        let stop = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await?;

        shutdown.cancel();
        if let Some(task) = sync_task {
            if let Err(e) = task.await {
                warn!(error = %e, "synchronizer task ended abnormally");
            }
        }
        info!("registry stopped");
        Ok(())
    }
}

/// Read the persisted registry id, generating one on first start
pub async fn load_or_create_registry_id(data_dir: &Path) -> Result<RegistryId> {
    let path = data_dir.join(REGISTRY_ID_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => text.trim().parse(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = RegistryId::new_random();
            tokio::fs::write(&path, format!("{id}\n"))
                .await
                .map_err(|e| DatumError::storage(format!("cannot write {}: {e}", path.display())))?;
            info!(registry = %id, path = %path.display(), "generated registry id");
            Ok(id)
        }
        Err(e) => Err(DatumError::storage(format!("cannot read {}: {e}", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_id_is_stable_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create_registry_id(dir.path()).await.unwrap();
        let second = load_or_create_registry_id(dir.path()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_open_uses_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DatumConfig::default();
        config.registry.data_dir = dir.path().to_path_buf();
        let node = DatumNode::open(config).await.unwrap();
        assert!(dir.path().join(RECORDS_DIR).is_dir());
        assert_eq!(node.id(), load_or_create_registry_id(dir.path()).await.unwrap());
        assert!(node.synchronizer().is_some());
    }
}
