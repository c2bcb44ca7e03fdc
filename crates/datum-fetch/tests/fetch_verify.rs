//! Fetch & verify behaviour against scripted origins

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use datum_core::fingerprint::{fingerprint, fingerprint_with};
use datum_core::{DatumError, DigestAlgorithm, Identifier, Release, ReleaseDraft, ReleaseKind, ReleaseMetadata, RetryPolicy};
use datum_fetch::{FetchClient, MemoryOrigin, ScriptedFailure};

const URL: &str = "https://acme.org/data/report.csv";

fn release_for(content: &[u8]) -> Release {
    ReleaseDraft {
        identifier: Identifier::parse("acme/report").unwrap(),
        version: 1,
        kind: ReleaseKind::Publication,
        fingerprint: fingerprint(content),
        origin_url: URL.to_string(),
        published_at: Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
        previous: None,
        gap_from: None,
        metadata: ReleaseMetadata::default(),
    }
    .seal()
}

fn client(origin: &Arc<MemoryOrigin>) -> FetchClient {
    FetchClient::new(origin.clone()).with_retry(
        RetryPolicy::exponential()
            .with_max_retries(3)
            .with_initial_delay(Duration::from_millis(10)),
    )
}

#[tokio::test(start_paused = true)]
async fn matching_content_is_verified() {
    let origin = Arc::new(MemoryOrigin::new());
    let content = b"region,total\nnorth,10\nsouth,12\n".repeat(500);
    origin.serve(URL, content.clone());

    let verified = client(&origin)
        .fetch_and_verify(&release_for(&content), None)
        .await
        .unwrap();
    assert_eq!(verified.bytes().as_ref(), content.as_slice());
    assert_eq!(verified.version(), 1);
}

#[tokio::test(start_paused = true)]
async fn altered_origin_bytes_are_an_integrity_violation() {
    let origin = Arc::new(MemoryOrigin::new());
    let release = release_for(b"original bytes");
    origin.serve(URL, &b"altered bytes"[..]);

    let err = client(&origin).fetch_and_verify(&release, None).await.unwrap_err();
    assert_matches!(err, DatumError::IntegrityViolation { .. });
    assert!(err.is_integrity_failure());
    // Never retried
    assert_eq!(origin.opens(URL), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let origin = Arc::new(MemoryOrigin::new());
    origin.serve(URL, &b"payload"[..]);
    origin.fail_next(URL, ScriptedFailure::Transient);
    origin.fail_next(URL, ScriptedFailure::Truncated);

    client(&origin)
        .fetch_and_verify(&release_for(b"payload"), None)
        .await
        .unwrap();
    assert_eq!(origin.opens(URL), 3);
}

#[tokio::test(start_paused = true)]
async fn retries_are_bounded() {
    let origin = Arc::new(MemoryOrigin::new());
    origin.serve(URL, &b"payload"[..]);
    for _ in 0..10 {
        origin.fail_next(URL, ScriptedFailure::Transient);
    }

    let err = client(&origin)
        .fetch_and_verify(&release_for(b"payload"), None)
        .await
        .unwrap_err();
    assert_matches!(err, DatumError::FetchError { retryable: true, .. });
    assert!(!err.is_integrity_failure());
    assert_eq!(origin.opens(URL), 4);
}

#[tokio::test(start_paused = true)]
async fn permanent_failures_surface_immediately() {
    let origin = Arc::new(MemoryOrigin::new());
    origin.serve(URL, &b"payload"[..]);
    origin.fail_next(URL, ScriptedFailure::Permanent);

    let err = client(&origin)
        .fetch_and_verify(&release_for(b"payload"), None)
        .await
        .unwrap_err();
    assert_matches!(err, DatumError::FetchError { retryable: false, .. });
    assert_eq!(origin.opens(URL), 1);
}

#[tokio::test(start_paused = true)]
async fn deadline_discards_partial_download() {
    let origin = Arc::new(MemoryOrigin::new());
    origin.serve(URL, &b"payload"[..]);
    origin.fail_next(URL, ScriptedFailure::Stall);

    let err = client(&origin)
        .fetch_and_verify(&release_for(b"payload"), Some(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert_matches!(err, DatumError::FetchError { .. });
    assert!(!err.is_integrity_failure());
}

#[tokio::test(start_paused = true)]
async fn oversized_content_is_refused() {
    let origin = Arc::new(MemoryOrigin::new());
    let content = vec![1u8; 64 * 1024];
    origin.serve(URL, content.clone());

    let err = client(&origin)
        .with_max_bytes(Some(1024))
        .fetch_and_verify(&release_for(&content), None)
        .await
        .unwrap_err();
    assert_matches!(err, DatumError::FetchError { retryable: false, .. });
}

#[tokio::test(start_paused = true)]
async fn fingerprint_origin_uses_requested_algorithm() {
    let origin = Arc::new(MemoryOrigin::new());
    origin.serve(URL, &b"census"[..]);

    let digest = client(&origin)
        .fingerprint_origin(URL, DigestAlgorithm::Blake3, None)
        .await
        .unwrap();
    assert_eq!(digest.fingerprint, fingerprint_with(DigestAlgorithm::Blake3, b"census"));
    assert_eq!(digest.size, 6);
}
