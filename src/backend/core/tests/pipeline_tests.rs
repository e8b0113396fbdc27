//! Integration tests for the global request pipeline.
//!
//! Tests cover:
//! - Request id generation and propagation
//! - Trailing slash normalization
//! - JSON content-type enforcement
//! - Panic recovery
//! - Request deadline
//! - Access logging and client address resolution
//! - JSON error bodies for framework-level rejections

mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    routing::{get, post},
    Router,
};
use common::{body_json, request, TestApp, ALICE_TOKEN, BOB_TOKEN};
use parrot_api::{
    api::{build_pipeline, App, PipelineConfig},
    middleware::{AccessLogLayer, AccessRecord, ClientAddr, REQUEST_ID_HEADER},
};
use serde_json::json;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

fn assert_json_content_type(response: &axum::response::Response) {
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(
        content_type.starts_with("application/json"),
        "content type was {:?}",
        content_type
    );
}

fn stub_app(router: Router, config: PipelineConfig) -> (App, mpsc::Receiver<AccessRecord>) {
    let (tx, rx) = mpsc::channel(16);
    (build_pipeline(router, &config, AccessLogLayer::new(tx)), rx)
}

async fn exploding_handler() -> &'static str {
    panic!("handler exploded")
}

async fn slow_handler() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "too late"
}

/// Router whose POST handler counts invocations.
fn counting_router(calls: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route("/echo", post(move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                "ok"
            }
        }))
        .route("/ok", get(|| async { "ok" }))
}

// ============================================================================
// Request Id
// ============================================================================

#[tokio::test]
async fn test_request_id_is_generated_and_echoed() {
    let app = TestApp::new();
    let response = app.send(request(Method::GET, "/api/ping", None, None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .expect("request id header")
        .to_str()
        .unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());
}

#[tokio::test]
async fn test_supplied_request_id_is_preserved() {
    let mut app = TestApp::new();
    let request = Request::builder()
        .uri("/api/ping")
        .header(REQUEST_ID_HEADER, "req-abc-123")
        .body(Body::empty())
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-abc-123");

    let record = app.access_log.recv().await.unwrap();
    assert_eq!(record.request_id, "req-abc-123");
    assert_eq!(record.path, "/api/ping");
    assert_eq!(record.status, StatusCode::OK);
}

#[tokio::test]
async fn test_error_responses_carry_request_id() {
    let app = TestApp::new();
    let response = app.send(request(Method::GET, "/api/projects", None, None)).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
}

// ============================================================================
// Path Normalization
// ============================================================================

#[tokio::test]
async fn test_trailing_slash_reaches_same_handler() {
    let app = TestApp::new();

    let plain = app.get("/api/projects", ALICE_TOKEN).await;
    let slashed = app.get("/api/projects/", ALICE_TOKEN).await;

    assert_eq!(plain.status(), StatusCode::OK);
    assert_eq!(slashed.status(), StatusCode::OK);
    assert_eq!(body_json(plain).await, body_json(slashed).await);
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let app = TestApp::new();
    let response = app.get("/nowhere", ALICE_TOKEN).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "RECORD_NOT_FOUND");
}

// ============================================================================
// Content Type
// ============================================================================

#[tokio::test]
async fn test_non_json_body_rejected_before_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (app, _log) = stub_app(counting_router(calls.clone()), PipelineConfig::default());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("hello"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNSUPPORTED_MEDIA_TYPE");
}

#[tokio::test]
async fn test_json_with_charset_is_accepted() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (app, _log) = stub_app(counting_router(calls.clone()), PipelineConfig::default());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
        .body(Body::from(r#"{"a":1}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bodyless_requests_skip_content_type_check() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (app, _log) = stub_app(counting_router(calls.clone()), PipelineConfig::default());

    let get = Request::builder().uri("/ok").body(Body::empty()).unwrap();
    assert_eq!(app.clone().oneshot(get).await.unwrap().status(), StatusCode::OK);

    let empty_post = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.oneshot(empty_post).await.unwrap().status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Panic Recovery
// ============================================================================

#[tokio::test]
async fn test_panic_becomes_500_and_server_keeps_serving() {
    let router = Router::new()
        .route("/boom", get(exploding_handler))
        .route("/ok", get(|| async { "ok" }));
    let (app, mut log) = stub_app(router, PipelineConfig::default());

    let boom = Request::builder().uri("/boom").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(boom).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    assert!(!body.to_string().contains("handler exploded"));

    let record = log.recv().await.unwrap();
    assert_eq!(record.status, StatusCode::INTERNAL_SERVER_ERROR);

    let ok = Request::builder().uri("/ok").body(Body::empty()).unwrap();
    assert_eq!(app.oneshot(ok).await.unwrap().status(), StatusCode::OK);
}

// ============================================================================
// Deadline
// ============================================================================

#[tokio::test]
async fn test_slow_handler_hits_deadline() {
    let router = Router::new().route("/slow", get(slow_handler));
    let config = PipelineConfig {
        request_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let (app, _log) = stub_app(router, config);

    let request = Request::builder().uri("/slow").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    assert_json_content_type(&response);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "REQUEST_TIMEOUT");
}

// ============================================================================
// Client Address
// ============================================================================

#[tokio::test]
async fn test_forwarded_for_used_only_when_trusted() {
    let router = Router::new().route("/whoami", get(|addr: ClientAddr| async move { addr.to_string() }));

    let forwarded = || {
        Request::builder()
            .uri("/whoami")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap()
    };

    let (trusting, mut log) = stub_app(
        router.clone(),
        PipelineConfig {
            trust_proxy_headers: true,
            ..Default::default()
        },
    );
    let response = trusting.oneshot(forwarded()).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"203.0.113.9");
    assert_eq!(log.recv().await.unwrap().client_addr, "203.0.113.9");

    let (untrusting, _log) = stub_app(router, PipelineConfig::default());
    let response = untrusting.oneshot(forwarded()).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"unknown");
}

#[tokio::test]
async fn test_registration_round_trip_through_pipeline() {
    let app = TestApp::new();
    let response = app
        .send(request(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": "Carol@Example.com", "name": "Carol", "password": "hunter2hunter2" })),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["data"]["email"], "carol@example.com");
    assert!(body["data"].get("password_hash").is_none());
}

// ============================================================================
// Error Envelope
// ============================================================================

fn raw_json_request(method: Method, uri: &str, token: Option<&str>, body: &'static str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn test_malformed_json_body_is_400_envelope() {
    let app = TestApp::new();
    let response = app
        .send(raw_json_request(Method::POST, "/api/auth/register", None, "{not json"))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_json_content_type(&response);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_mistyped_json_body_is_422_envelope() {
    let app = TestApp::new();
    let response = app
        .send(raw_json_request(
            Method::POST,
            "/api/projects",
            Some(ALICE_TOKEN),
            r#"{"name": 42}"#,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_json_content_type(&response);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unsupported_method_is_405_envelope() {
    let app = TestApp::new();
    let response = app
        .send(request(Method::PUT, "/api/projects/proj-1", Some(BOB_TOKEN), None))
        .await;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_json_content_type(&response);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "METHOD_NOT_ALLOWED");
}
