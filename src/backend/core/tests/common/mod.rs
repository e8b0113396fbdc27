//! Shared fixtures for integration tests.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
};
use parrot_api::{
    api::{build_app, App, AppState, PipelineConfig},
    db::{InMemoryStore, Project, User},
    middleware::{AccessLogLayer, AccessRecord, StaticIntrospector},
    rbac::{Principal, ProjectId, Role},
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const ALICE_TOKEN: &str = "token-alice";
pub const BOB_TOKEN: &str = "token-bob";
pub const CLIENT_TOKEN: &str = "token-client";

/// A running app over an in-memory store, plus the handles tests poke at.
pub struct TestApp {
    pub app: App,
    pub store: InMemoryStore,
    pub introspector: StaticIntrospector,
    pub access_log: mpsc::Receiver<AccessRecord>,
}

impl TestApp {
    /// Alice owns nothing yet, Bob is a viewer of `proj-1`.
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let store = InMemoryStore::new();
        store.insert_user(user("alice", "alice@example.com"));
        store.insert_user(user("bob", "bob@example.com"));
        store.insert_project(Project {
            id: project_id("proj-1"),
            name: "Website".into(),
            keys: vec!["greeting".into()],
        });
        store.grant(&project_id("proj-1"), "bob", Role::Viewer);

        let introspector = StaticIntrospector::new()
            .with_token(ALICE_TOKEN, Principal::user("alice"))
            .with_token(BOB_TOKEN, Principal::user("bob"));

        let (tx, rx) = mpsc::channel(64);
        let state = AppState::new(Arc::new(store.clone()), Arc::new(introspector.clone()));
        let app = build_app(state, &config, AccessLogLayer::new(tx));

        Self {
            app,
            store,
            introspector,
            access_log: rx,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, token: &str) -> Response {
        self.send(request(Method::GET, uri, Some(token), None)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> Response {
        self.send(request(Method::DELETE, uri, Some(token), None)).await
    }

    pub async fn post_json(&self, uri: &str, token: &str, body: Value) -> Response {
        self.send(request(Method::POST, uri, Some(token), Some(body)))
            .await
    }

    pub async fn patch_json(&self, uri: &str, token: &str, body: Value) -> Response {
        self.send(request(Method::PATCH, uri, Some(token), Some(body)))
            .await
    }
}

pub fn project_id(raw: &str) -> ProjectId {
    ProjectId::parse(raw).unwrap()
}

pub fn user(id: &str, email: &str) -> User {
    User {
        id: id.into(),
        email: email.into(),
        name: id.into(),
        password_hash: String::new(),
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}
