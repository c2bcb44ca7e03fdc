//! Router behavior through `tower::ServiceExt::oneshot`, plus federation over real HTTP

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use datum_core::fingerprint::fingerprint;
use datum_core::{DatumConfig, RegistryId, Release, RetryPolicy};
use datum_fetch::{FetchClient, MemoryOrigin};
use datum_node::{DatumNode, HttpPeerTransport};
use datum_store::MemoryRecordStore;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

const CSV: &[u8] = b"region,count\nnorth,10\nsouth,12\n";
const URL: &str = "https://acme.example/report.csv";

async fn node(seed: u128) -> (DatumNode, Arc<MemoryOrigin>) {
    let origin = Arc::new(MemoryOrigin::new());
    let fetch = FetchClient::new(origin.clone()).with_retry(RetryPolicy::none());
    let node = DatumNode::assemble(
        DatumConfig::default(),
        RegistryId::from_u128(seed),
        Arc::new(MemoryRecordStore::new()),
        fetch,
    )
    .await
    .unwrap();
    (node, origin)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(serde_json::to_vec(&body).unwrap())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn submission(version: u64) -> Value {
    json!({
        "namespace": "acme",
        "slug": "report",
        "origin_url": URL,
        "version": version,
        "metadata": {"title": "Regional counts", "tags": ["census"]}
    })
}

#[tokio::test]
async fn publish_then_resolve() {
    let (node, origin) = node(1).await;
    origin.serve(URL, CSV);
    let app = node.router();

    let (status, body) = call(&app, "POST", "/api/v1/releases", Some(submission(1))).await;
    assert_eq!(status, StatusCode::CREATED);
    let release: Release = serde_json::from_value(body).unwrap();
    assert_eq!(release.fingerprint, fingerprint(CSV));

    let (status, body) = call(&app, "GET", "/api/v1/resolve/acme/report@1", None).await;
    assert_eq!(status, StatusCode::OK);
    let resolved: Release = serde_json::from_value(body["release"].clone()).unwrap();
    assert_eq!(resolved, release);
    assert_eq!(body["markers"], json!([]));

    let (status, body) = call(&app, "GET", "/api/v1/resolve/acme/report", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["release"]["version"], 1);
}

#[tokio::test]
async fn republishing_a_version_is_a_conflict() {
    let (node, origin) = node(1).await;
    origin.serve(URL, CSV);
    let app = node.router();

    call(&app, "POST", "/api/v1/releases", Some(submission(1))).await;
    origin.serve(URL, &b"region,count\nnorth,11\n"[..]);
    let (status, body) = call(&app, "POST", "/api/v1/releases", Some(submission(1))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "version_conflict");
    assert!(body["message"].as_str().unwrap().contains("acme/report"));
}

#[tokio::test]
async fn unexpected_origin_content_is_unprocessable() {
    let (node, origin) = node(1).await;
    origin.serve(URL, &b"tampered"[..]);
    let app = node.router();

    let mut body = submission(1);
    body["expected_fingerprint"] = json!(fingerprint(CSV).to_string());
    let (status, body) = call(&app, "POST", "/api/v1/releases", Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "integrity_violation");

    let (status, _) = call(&app, "GET", "/api/v1/resolve/acme/report", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn retraction_appears_in_history() {
    let (node, origin) = node(1).await;
    origin.serve(URL, CSV);
    let app = node.router();
    call(&app, "POST", "/api/v1/releases", Some(submission(1))).await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/datasets/acme/report/retract",
        Some(json!({"version": 1, "reason": "incorrect data"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(&app, "GET", "/api/v1/datasets/acme/report/history?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    let releases: Vec<Release> = serde_json::from_value(body["releases"].clone()).unwrap();
    assert_eq!(releases.len(), 2);
    assert_eq!(releases[0].fingerprint, fingerprint(CSV));
    assert_eq!(releases[1].retracts(), Some(1));
    assert_eq!(body["has_more"], false);

    let (_, body) = call(&app, "GET", "/api/v1/resolve/acme/report@1", None).await;
    assert_eq!(body["retracted_by"]["version"], 2);
}

#[tokio::test]
async fn history_pages_with_cursor() {
    let (node, origin) = node(1).await;
    origin.serve(URL, CSV);
    let app = node.router();
    for v in 1..=3 {
        call(&app, "POST", "/api/v1/releases", Some(submission(v))).await;
    }

    let (_, first) = call(&app, "GET", "/api/v1/datasets/acme/report/history?limit=2", None).await;
    assert_eq!(first["has_more"], true);
    let cursor = first["next_cursor"].as_str().unwrap();

    let uri = format!("/api/v1/datasets/acme/report/history?limit=2&cursor={cursor}");
    let (_, second) = call(&app, "GET", &uri, None).await;
    assert_eq!(second["releases"][0]["version"], 3);
    assert_eq!(second["has_more"], false);

    let (status, body) = call(&app, "GET", "/api/v1/datasets/acme/report/history?cursor=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_format");
}

#[tokio::test]
async fn malformed_requests_are_structured_errors() {
    let (node, _) = node(1).await;
    let app = node.router();

    let (status, body) = call(&app, "POST", "/api/v1/releases", Some(json!({"namespace": "acme"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_format");

    let (status, body) = call(&app, "GET", "/api/v1/resolve/Acme/Report", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_format");

    let (status, body) = call(&app, "GET", "/api/v1/resolve/acme/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn catalog_suggest_namespace_and_stats() {
    let (node, origin) = node(1).await;
    origin.serve(URL, CSV);
    let app = node.router();
    call(&app, "POST", "/api/v1/releases", Some(submission(1))).await;

    let (status, body) = call(&app, "GET", "/api/v1/datasets?q=regional", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["identifier"], "acme/report");

    let (_, body) = call(&app, "GET", "/api/v1/datasets?tag=census&limit=5", None).await;
    assert_eq!(body["total"], 1);

    let (status, body) = call(&app, "GET", "/api/v1/suggest?q=acme/reprt", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["identifier"], "acme/report");

    let (status, body) = call(&app, "GET", "/api/v1/namespaces/acme", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = call(&app, "GET", "/api/v1/stats", None).await;
    assert_eq!(body["identifiers"], 1);
    assert_eq!(body["releases"], 1);
}

#[tokio::test]
async fn retired_identifier_rejects_new_versions() {
    let (node, origin) = node(1).await;
    origin.serve(URL, CSV);
    let app = node.router();
    call(&app, "POST", "/api/v1/releases", Some(submission(1))).await;

    let (status, _) = call(&app, "POST", "/api/v1/datasets/acme/report/retire", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(&app, "POST", "/api/v1/releases", Some(submission(2))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "version_conflict");

    let (status, _) = call(&app, "GET", "/api/v1/resolve/acme/report@1", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn federation_endpoints_use_envelopes() {
    let (node, origin) = node(1).await;
    origin.serve(URL, CSV);
    let app = node.router();
    call(&app, "POST", "/api/v1/releases", Some(submission(1))).await;

    let (status, body) = call(&app, "GET", "/federation/v1/advertisements", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schema_version"], 1);
    assert_eq!(body["payload"]["advertisements"][0]["tip_version"], 1);

    let pull = json!({
        "schema_version": 1,
        "payload": {
            "registry": RegistryId::from_u128(2),
            "identifier": "acme/report",
            "from_version": 0,
            "limit": 10
        }
    });
    let (status, body) = call(&app, "POST", "/federation/v1/pull", Some(pull.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payload"]["releases"].as_array().unwrap().len(), 1);

    let mut future = pull;
    future["schema_version"] = json!(99);
    let (status, body) = call(&app, "POST", "/federation/v1/pull", Some(future)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_format");
}

#[tokio::test]
async fn replica_syncs_over_http() {
    let (home, origin) = node(1).await;
    origin.serve(URL, CSV);
    let home_app = home.router();
    for v in 1..=2 {
        call(&home_app, "POST", "/api/v1/releases", Some(submission(v))).await;
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { axum::serve(listener, home_app).await });

    let (replica, _) = node(2).await;
    let transport = HttpPeerTransport::new(home.id(), &format!("http://{addr}"), Duration::from_secs(5), "datum-test")
        .unwrap();
    let sync = replica.synchronizer().unwrap();
    sync.add_peer(Arc::new(transport)).await;

    let report = sync.sync_with_peer(home.id()).await.unwrap();
    assert_eq!(report.pulled, 2);
    assert!(report.errors.is_empty());

    let (status, body) = call(&replica.router(), "GET", "/api/v1/resolve/acme/report@2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["home"], json!(home.id()));

    // Replicas refuse local publications for identifiers homed elsewhere
    let (status, body) = call(&replica.router(), "POST", "/api/v1/releases", Some(submission(3))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "not_home");

    server.abort();
}
