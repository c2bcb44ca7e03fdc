//! Peer transports
//!
//! [`PeerTransport`] is the seam between the synchronizer and the network.
//! The HTTP implementation lives with the node; [`LoopbackTransport`] talks
//! to an in-process [`FederationHandler`] and still goes through the wire
//! codec so both sides see exactly what would cross the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use datum_core::{DatumError, RegistryId, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::handler::FederationHandler;
use crate::wire::{self, AdvertisementSet, PullRequest, PullResponse, PushAck, PushMessage};

/// Connection to one peer registry
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Registry at the other end
    fn peer(&self) -> RegistryId;

    /// Fetch the peer's advertisements
    async fn advertisements(&self) -> Result<AdvertisementSet>;

    /// Ask the peer for releases
    async fn pull(&self, request: PullRequest) -> Result<PullResponse>;

    /// Send releases to the peer
    async fn push(&self, message: PushMessage) -> Result<PushAck>;
}

/// In-process transport to another registry's handler
#[derive(Debug)]
pub struct LoopbackTransport {
    handler: FederationHandler,
    offline: AtomicBool,
}

impl LoopbackTransport {
    /// Transport reaching `handler`
    pub fn new(handler: FederationHandler) -> Self {
        Self {
            handler,
            offline: AtomicBool::new(false),
        }
    }

    /// Make every call fail as if the peer were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DatumError::fetch_transient(
                format!("loopback://{}", self.peer()),
                "peer unreachable",
            ));
        }
        Ok(())
    }
}

fn through_wire<T: Serialize + DeserializeOwned>(value: T) -> Result<T> {
    wire::decode(&wire::encode(value)?)
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    fn peer(&self) -> RegistryId {
        self.handler.index().local_id()
    }

    async fn advertisements(&self) -> Result<AdvertisementSet> {
        self.check_online()?;
        through_wire(self.handler.advertisements().await?)
    }

    async fn pull(&self, request: PullRequest) -> Result<PullResponse> {
        self.check_online()?;
        let response = self.handler.handle_pull(through_wire(request)?).await;
        through_wire(response?)
    }

    async fn push(&self, message: PushMessage) -> Result<PushAck> {
        self.check_online()?;
        let ack = self.handler.handle_push(through_wire(message)?).await;
        through_wire(ack?)
    }
}

/// Shared transport handle
pub type SharedTransport = Arc<dyn PeerTransport>;
