//! HTTP adapters against a local stub server: status and timeout mapping

mod helpers;

use chrono::Utc;
use helpers::http_stub::{closed_port_url, StubResponse, StubServer};
use imgclass_pipeline::classifier::{HttpInferenceEndpoint, InferenceEndpoint};
use imgclass_pipeline::error::ErrorKind;
use imgclass_pipeline::notify::{FailureNotice, NotificationSink, NotifyError, WebhookNotificationSink};
use imgclass_pipeline::storage::{HttpObjectStore, ObjectStore};
use imgclass_pipeline::types::{Stage, StorageLocation};
use std::time::Duration;

async fn classify_with(response: StubResponse) -> Result<Vec<f64>, ErrorKind> {
    let server = StubServer::start(response).await;
    let endpoint = HttpInferenceEndpoint::new(server.url("/invocations")).unwrap();
    endpoint.classify(b"image").await.map_err(|e| e.kind)
}

async fn fetch_with(response: StubResponse) -> Result<Vec<u8>, ErrorKind> {
    let server = StubServer::start(response).await;
    let store = HttpObjectStore::new(server.url("")).unwrap();
    store
        .get(&StorageLocation::new("image-bucket", "test/bike.png"))
        .await
        .map_err(|e| e.kind)
}

fn notice() -> FailureNotice {
    FailureNotice {
        task_id: "item-3".to_string(),
        location: StorageLocation::new("image-bucket", "test/bike.png"),
        error_kind: ErrorKind::ConfidenceBelowThreshold,
        stage: Some(Stage::Filter),
        attempts: 1,
        reason: Some("0.90 < 0.91".to_string()),
        top_label: Some("motorcycle".to_string()),
        top_score: Some(0.90),
        threshold: Some(0.91),
        timestamp: Utc::now(),
    }
}

// ============================================================================
// Inference endpoint
// ============================================================================

#[tokio::test]
async fn inference_posts_raw_image_with_content_type() {
    let server = StubServer::start(StubResponse::new(200, "[0.02, 0.9]")).await;
    let endpoint = HttpInferenceEndpoint::new(server.url("/invocations"))
        .unwrap()
        .with_content_type("image/jpeg");

    let scores = endpoint.classify(b"\x89PNG raw").await.unwrap();

    assert_eq!(scores, vec![0.02, 0.9]);
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/invocations");
    assert_eq!(requests[0].header("content-type"), Some("image/jpeg"));
    assert_eq!(requests[0].body, b"\x89PNG raw");
}

#[tokio::test]
async fn inference_status_429_is_throttling() {
    let result = classify_with(StubResponse::new(429, "slow down")).await;
    assert_eq!(result, Err(ErrorKind::ThrottlingError));
}

#[tokio::test]
async fn inference_server_errors_are_transient() {
    for status in [500, 503] {
        let result = classify_with(StubResponse::new(status, "unavailable")).await;
        assert_eq!(result, Err(ErrorKind::TransientServiceError), "status {}", status);
    }
}

#[tokio::test]
async fn inference_non_array_body_is_malformed() {
    let result = classify_with(StubResponse::new(200, r#"{"x": 1}"#)).await;
    assert_eq!(result, Err(ErrorKind::MalformedResponseError));
}

#[tokio::test]
async fn inference_slow_response_times_out() {
    let server = StubServer::start(StubResponse::new(200, "[0.5, 0.5]").delayed(Duration::from_secs(5))).await;
    let endpoint = HttpInferenceEndpoint::new(server.url("/invocations"))
        .unwrap()
        .with_timeout(Duration::from_millis(200));

    let err = endpoint.classify(b"image").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn inference_connection_refused_is_transient() {
    let endpoint = HttpInferenceEndpoint::new(closed_port_url("/invocations").await).unwrap();
    let err = endpoint.classify(b"image").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TransientServiceError);
}

// ============================================================================
// Object store
// ============================================================================

#[tokio::test]
async fn object_store_gets_bucket_and_key() {
    let server = StubServer::start(StubResponse::new(200, b"\x89PNG bytes".to_vec())).await;
    let store = HttpObjectStore::new(server.url("/")).unwrap();

    let bytes = store
        .get(&StorageLocation::new("image-bucket", "test/bike.png"))
        .await
        .unwrap();

    assert_eq!(bytes, b"\x89PNG bytes");
    let requests = server.requests();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/image-bucket/test/bike.png");
}

#[tokio::test]
async fn object_store_404_is_not_found() {
    assert_eq!(fetch_with(StubResponse::new(404, "")).await, Err(ErrorKind::NotFoundError));
}

#[tokio::test]
async fn object_store_other_failures_are_transient() {
    for status in [403, 500, 503] {
        let result = fetch_with(StubResponse::new(status, "nope")).await;
        assert_eq!(result, Err(ErrorKind::TransientStorageError), "status {}", status);
    }

    let store = HttpObjectStore::new(closed_port_url("").await).unwrap();
    let err = store.get(&StorageLocation::new("b", "k.png")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TransientStorageError);
}

// ============================================================================
// Webhook sink
// ============================================================================

#[tokio::test]
async fn webhook_posts_notice_as_json() {
    let server = StubServer::start(StubResponse::new(200, "")).await;
    let sink = WebhookNotificationSink::new(server.url("/hooks/failures")).unwrap();

    sink.publish(&notice()).await.unwrap();

    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/hooks/failures");
    assert_eq!(requests[0].header("content-type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["task_id"], "item-3");
    assert_eq!(body["error_kind"], "CONFIDENCE_BELOW_THRESHOLD");
    assert_eq!(body["stage"], "Filter");
}

#[tokio::test]
async fn webhook_error_status_is_rejected() {
    let server = StubServer::start(StubResponse::new(500, "boom")).await;
    let sink = WebhookNotificationSink::new(server.url("/hooks/failures")).unwrap();

    match sink.publish(&notice()).await {
        Err(NotifyError::Rejected(status)) => assert_eq!(status, 500),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn webhook_unreachable_is_transport_error() {
    let sink = WebhookNotificationSink::new(closed_port_url("/hooks").await).unwrap();
    assert!(matches!(sink.publish(&notice()).await, Err(NotifyError::Transport(_))));
}
