//! HTTP transport to peer registries

use std::time::Duration;

use async_trait::async_trait;
use datum_core::{DatumError, RegistryId, Result};
use datum_federation::{AdvertisementSet, PeerTransport, PullRequest, PullResponse, PushAck, PushMessage, WireEnvelope};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::error::ErrorBody;

/// Talks to a peer's `/federation/v1` endpoints
#[derive(Debug, Clone)]
pub struct HttpPeerTransport {
    peer: RegistryId,
    base: Url,
    client: reqwest::Client,
}

impl HttpPeerTransport {
    /// Transport to registry `peer` served at `base_url`
    pub fn new(peer: RegistryId, base_url: &str, timeout: Duration, user_agent: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| DatumError::config(format!("peer {peer} url '{base_url}': {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| DatumError::config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { peer, base, client })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| DatumError::internal(format!("bad federation path {path}: {e}")))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        let response = self.client.get(url.clone()).send().await;
        self.read(&url, response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: B) -> Result<T> {
        let url = self.endpoint(path)?;
        let response = self.client.post(url.clone()).json(&WireEnvelope::new(body)).send().await;
        self.read(&url, response).await
    }

    async fn read<T: DeserializeOwned>(
        &self,
        url: &Url,
        response: std::result::Result<reqwest::Response, reqwest::Error>,
    ) -> Result<T> {
        let response = response.map_err(|e| DatumError::fetch_transient(url.as_str(), e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| DatumError::fetch_transient(url.as_str(), e.to_string()))?;

        if status.is_success() {
            let envelope: WireEnvelope<T> = serde_json::from_slice(&body)?;
            return envelope.into_payload();
        }
        if let Ok(error) = serde_json::from_slice::<ErrorBody>(&body) {
            return Err(error.error);
        }
        let message = format!("peer {} answered {status}", self.peer);
        Err(if is_transient(status) {
            DatumError::fetch_transient(url.as_str(), message)
        } else {
            DatumError::fetch_permanent(url.as_str(), message)
        })
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    fn peer(&self) -> RegistryId {
        self.peer
    }

    async fn advertisements(&self) -> Result<AdvertisementSet> {
        self.get("federation/v1/advertisements").await
    }

    async fn pull(&self, request: PullRequest) -> Result<PullResponse> {
        self.post("federation/v1/pull", request).await
    }

    async fn push(&self, message: PushMessage) -> Result<PushAck> {
        self.post("federation/v1/push", message).await
    }
}
