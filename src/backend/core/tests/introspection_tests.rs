//! Integration tests for token introspection against a mock authority.
//!
//! Tests cover:
//! - Active, inactive and expired tokens
//! - Authority rejections and failures
//! - Malformed responses and timeouts
//! - The full request path with an HTTP introspector

mod common;

use axum::http::StatusCode;
use common::{body_json, project_id, user};
use parrot_api::{
    api::{build_app, AppState, PipelineConfig},
    db::{InMemoryStore, Project},
    middleware::{
        introspection::DEFAULT_INTROSPECTION_PATH, AccessLogLayer, HttpIntrospector,
        IntrospectionError, TokenIntrospector,
    },
    rbac::{Role, SubjectKind},
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn introspector(server: &MockServer) -> HttpIntrospector {
    HttpIntrospector::new(&server.uri(), DEFAULT_INTROSPECTION_PATH, Duration::from_millis(200))
        .unwrap()
}

async fn authority_answers(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(DEFAULT_INTROSPECTION_PATH))
        .respond_with(template)
        .mount(server)
        .await;
}

fn future_exp() -> i64 {
    (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp()
}

// ============================================================================
// Introspector
// ============================================================================

#[tokio::test]
async fn test_active_token_yields_principal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEFAULT_INTROSPECTION_PATH))
        .and(body_string_contains("token=good-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "sub": "alice",
            "exp": future_exp(),
            "scope": "read write",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let principal = introspector(&server).introspect("good-token").await.unwrap();

    assert_eq!(principal.id.as_str(), "alice");
    assert_eq!(principal.kind, SubjectKind::User);
    assert!(principal.expires_at.is_some());
}

#[tokio::test]
async fn test_client_subject_kind() {
    let server = MockServer::start().await;
    authority_answers(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "sub": "client-7",
            "sub_type": "client",
        })),
    )
    .await;

    let principal = introspector(&server).introspect("t").await.unwrap();
    assert_eq!(principal.kind, SubjectKind::Client);
}

#[tokio::test]
async fn test_inactive_token_is_unauthenticated() {
    let server = MockServer::start().await;
    authority_answers(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "active": false })),
    )
    .await;

    let err = introspector(&server).introspect("t").await.unwrap_err();
    assert!(matches!(err, IntrospectionError::Unauthenticated(_)));
}

#[tokio::test]
async fn test_expired_token() {
    let server = MockServer::start().await;
    authority_answers(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "sub": "alice",
            "exp": chrono::Utc::now().timestamp() - 60,
        })),
    )
    .await;

    let err = introspector(&server).introspect("t").await.unwrap_err();
    assert!(matches!(err, IntrospectionError::Expired));
}

#[tokio::test]
async fn test_authority_rejection_is_unauthenticated() {
    let server = MockServer::start().await;
    authority_answers(&server, ResponseTemplate::new(401)).await;

    let err = introspector(&server).introspect("t").await.unwrap_err();
    assert!(matches!(err, IntrospectionError::Unauthenticated(_)));
}

#[tokio::test]
async fn test_authority_failure_is_upstream_unavailable() {
    let server = MockServer::start().await;
    authority_answers(&server, ResponseTemplate::new(500)).await;

    let err = introspector(&server).introspect("t").await.unwrap_err();
    assert!(matches!(err, IntrospectionError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn test_malformed_body_is_upstream_unavailable() {
    let server = MockServer::start().await;
    authority_answers(&server, ResponseTemplate::new(200).set_body_string("<html>")).await;

    let err = introspector(&server).introspect("t").await.unwrap_err();
    assert!(matches!(err, IntrospectionError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn test_slow_authority_times_out() {
    let server = MockServer::start().await;
    authority_answers(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "active": true, "sub": "alice" }))
            .set_delay(Duration::from_secs(2)),
    )
    .await;

    let err = introspector(&server).introspect("t").await.unwrap_err();
    assert!(matches!(err, IntrospectionError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn test_unreachable_authority_is_upstream_unavailable() {
    let server = MockServer::start().await;
    let unreachable = introspector(&server);
    drop(server);

    let err = unreachable.introspect("t").await.unwrap_err();
    assert!(matches!(err, IntrospectionError::UpstreamUnavailable(_)));
}

// ============================================================================
// Through the App
// ============================================================================

fn app_with(server: &MockServer) -> parrot_api::api::App {
    let store = InMemoryStore::new();
    store.insert_user(user("alice", "alice@example.com"));
    store.insert_project(Project {
        id: project_id("proj-1"),
        name: "Website".into(),
        keys: vec![],
    });
    store.grant(&project_id("proj-1"), "alice", Role::Viewer);

    let state = AppState::new(Arc::new(store), Arc::new(introspector(server)));
    let (tx, _rx) = mpsc::channel(16);
    build_app(state, &PipelineConfig::default(), AccessLogLayer::new(tx))
}

fn bearer(uri: &str, token: &str) -> axum::http::Request<axum::body::Body> {
    common::request(axum::http::Method::GET, uri, Some(token), None)
}

#[tokio::test]
async fn test_app_serves_introspected_principal() {
    let server = MockServer::start().await;
    authority_answers(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "active": true, "sub": "alice" })),
    )
    .await;

    let response = app_with(&server)
        .oneshot(bearer("/api/projects/proj-1", "any"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["id"], "proj-1");
}

#[tokio::test]
async fn test_app_maps_authority_outage_to_503() {
    let server = MockServer::start().await;
    authority_answers(&server, ResponseTemplate::new(502)).await;

    let response = app_with(&server)
        .oneshot(bearer("/api/projects/proj-1", "any"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(!response
        .headers()
        .contains_key(axum::http::header::WWW_AUTHENTICATE));
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UPSTREAM_UNAVAILABLE");
}

#[tokio::test]
async fn test_app_never_calls_authority_without_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let response = app_with(&server)
        .oneshot(common::request(
            axum::http::Method::GET,
            "/api/projects/proj-1",
            None,
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
