//! HTTP surface
//!
//! Publisher and consumer endpoints under `/api/v1`, peer endpoints under
//! `/federation/v1`. Every failure renders as an [`ErrorBody`](crate::error::ErrorBody).

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use datum_core::{DatumError, Identifier, IdentifierRef, RegistryId, Release};
use datum_federation::{
    AdvertisementSet, FederationHandler, FederationSynchronizer, PullRequest, PullResponse, PushAck, PushMessage,
    SyncReport, WireEnvelope,
};
use datum_registry::{
    CatalogEntry, CatalogPage, CatalogQuery, HistoryCursor, HistoryPage, PublishService, RegistryIndex, RegistryStats,
    Resolution, RetractRequest, Submission, Suggestion,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, ApiResult};

/// Shared state for axum handlers
#[derive(Clone)]
pub struct AppState {
    /// Submission and retraction
    pub publish: PublishService,
    /// Serving side of federation
    pub federation: FederationHandler,
    /// Synchronizer, when federation is enabled
    pub sync: Option<Arc<FederationSynchronizer>>,
}

impl AppState {
    fn index(&self) -> &Arc<RegistryIndex> {
        self.publish.index()
    }

    fn sync(&self) -> ApiResult<&Arc<FederationSynchronizer>> {
        self.sync
            .as_ref()
            .ok_or_else(|| ApiError(DatumError::not_found("federation is disabled on this registry")))
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/releases", post(submit_release))
        .route("/api/v1/resolve/:namespace/:reference", get(resolve))
        .route("/api/v1/datasets", get(catalog))
        .route("/api/v1/datasets/:namespace/:slug/history", get(history))
        .route("/api/v1/datasets/:namespace/:slug/retract", post(retract))
        .route("/api/v1/datasets/:namespace/:slug/retire", post(retire))
        .route("/api/v1/namespaces/:namespace", get(namespace))
        .route("/api/v1/suggest", get(suggest))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/sync", get(last_sync).post(sync_now))
        .route("/federation/v1/advertisements", get(advertisements))
        .route("/federation/v1/pull", post(pull))
        .route("/federation/v1/push", post(push))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    registry: RegistryId,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        registry: state.index().local_id(),
    })
}

async fn submit_release(
    State(state): State<AppState>,
    payload: Result<Json<Submission>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Release>)> {
    let Json(submission) = payload?;
    let release = state.publish.submit(submission).await?;
    Ok((StatusCode::CREATED, Json(release)))
}

async fn retract(
    State(state): State<AppState>,
    Path((namespace, slug)): Path<(String, String)>,
    payload: Result<Json<RetractRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Release>)> {
    let Json(request) = payload?;
    let identifier = Identifier::new(namespace, slug)?;
    let tombstone = state.publish.retract(&identifier, request).await?;
    Ok((StatusCode::CREATED, Json(tombstone)))
}

async fn retire(State(state): State<AppState>, Path((namespace, slug)): Path<(String, String)>) -> ApiResult<StatusCode> {
    let identifier = Identifier::new(namespace, slug)?;
    state.index().retire(&identifier).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resolve(
    State(state): State<AppState>,
    Path((namespace, reference)): Path<(String, String)>,
) -> ApiResult<Json<Resolution>> {
    let reference = IdentifierRef::parse(&format!("{namespace}/{reference}"))?;
    Ok(Json(state.index().resolve(&reference).await?))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    cursor: Option<HistoryCursor>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    Path((namespace, slug)): Path<(String, String)>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<HistoryPage>> {
    let Query(query) = query?;
    let identifier = Identifier::new(namespace, slug)?;
    Ok(Json(state.index().history(&identifier, query.cursor, query.limit).await?))
}

async fn catalog(
    State(state): State<AppState>,
    query: Result<Query<CatalogQuery>, QueryRejection>,
) -> ApiResult<Json<CatalogPage>> {
    let Query(query) = query?;
    Ok(Json(state.index().catalog(&query).await?))
}

#[derive(Debug, Deserialize)]
struct SuggestQuery {
    q: String,
    #[serde(default)]
    n: Option<usize>,
}

async fn suggest(
    State(state): State<AppState>,
    query: Result<Query<SuggestQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Suggestion>>> {
    let Query(query) = query?;
    Ok(Json(state.index().suggest(&query.q, query.n).await?))
}

async fn namespace(State(state): State<AppState>, Path(namespace): Path<String>) -> ApiResult<Json<Vec<CatalogEntry>>> {
    Ok(Json(state.index().namespace(&namespace).await?))
}

async fn stats(State(state): State<AppState>) -> ApiResult<Json<RegistryStats>> {
    Ok(Json(state.index().stats().await?))
}

/// Result of syncing one peer on demand
#[derive(Debug, Serialize)]
struct PeerSync {
    peer: RegistryId,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<SyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<DatumError>,
}

async fn sync_now(State(state): State<AppState>) -> ApiResult<Json<Vec<PeerSync>>> {
    let results = state.sync()?.sync_round().await;
    Ok(Json(
        results
            .into_iter()
            .map(|(peer, result)| match result {
                Ok(report) => PeerSync {
                    peer,
                    report: Some(report),
                    error: None,
                },
                Err(error) => PeerSync {
                    peer,
                    report: None,
                    error: Some(error),
                },
            })
            .collect(),
    ))
}

async fn last_sync(State(state): State<AppState>) -> ApiResult<Json<Vec<SyncReport>>> {
    Ok(Json(state.sync()?.last_reports()))
}

async fn advertisements(State(state): State<AppState>) -> ApiResult<Json<WireEnvelope<AdvertisementSet>>> {
    Ok(Json(WireEnvelope::new(state.federation.advertisements().await?)))
}

async fn pull(
    State(state): State<AppState>,
    payload: Result<Json<WireEnvelope<PullRequest>>, JsonRejection>,
) -> ApiResult<Json<WireEnvelope<PullResponse>>> {
    let Json(envelope) = payload?;
    let response = state.federation.handle_pull(envelope.into_payload()?).await?;
    Ok(Json(WireEnvelope::new(response)))
}

async fn push(
    State(state): State<AppState>,
    payload: Result<Json<WireEnvelope<PushMessage>>, JsonRejection>,
) -> ApiResult<Json<WireEnvelope<PushAck>>> {
    let Json(envelope) = payload?;
    let ack = state.federation.handle_push(envelope.into_payload()?).await?;
    Ok(Json(WireEnvelope::new(ack)))
}
