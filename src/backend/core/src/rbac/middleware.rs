//! Capability guard for project-scoped routes.
//!
//! The guard reads the [`Principal`] inserted by the authentication layer,
//! takes `project_id` from the matched route, and asks the policy engine
//! whether the principal holds the route's capability. The wrapped handler
//! runs only on an `Allow`.
//!
//! # Example
//!
//! ```rust,ignore
//! use parrot_api::rbac::{Capability, Guard};
//!
//! let guard = Guard::new(store.clone(), Duration::from_secs(2));
//!
//! let app = Router::new().route(
//!     "/projects/:project_id",
//!     guard
//!         .must(Capability::ViewProject, get(show_project))
//!         .merge(guard.must(Capability::DeleteProject, delete(delete_project))),
//! );
//! ```

use axum::{
    body::Body,
    extract::{FromRequestParts, Path, Request},
    http::request::Parts,
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};
use tracing::{error, warn};

use super::models::{Capability, Principal, ProjectId};
use super::policy::{PolicyDecision, PolicyEngine};
use crate::db::Store;
use crate::error::{ApiError, ErrorCode};

/// Name of the route parameter holding the project scope.
pub const PROJECT_ID_PARAM: &str = "project_id";

// ═══════════════════════════════════════════════════════════════════════════════
// Authorized Project (extracted in handlers)
// ═══════════════════════════════════════════════════════════════════════════════

/// Proof that the capability check passed for this request.
///
/// Inserted into request extensions by the guard so handlers get the
/// validated project id without parsing the path again.
#[derive(Debug, Clone)]
pub struct AuthorizedProject {
    pub principal: Principal,
    pub project_id: ProjectId,
    pub capability: Capability,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthorizedProject
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthorizedProject>()
            .cloned()
            .ok_or_else(|| ApiError::internal("handler reached without a capability check"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Guard
// ═══════════════════════════════════════════════════════════════════════════════

/// Wraps method routers with a capability check.
#[derive(Debug, Clone)]
pub struct Guard {
    engine: PolicyEngine,
}

impl Guard {
    pub fn new(store: Arc<dyn Store>, lookup_timeout: Duration) -> Self {
        Self {
            engine: PolicyEngine::new(store).with_lookup_timeout(lookup_timeout),
        }
    }

    pub fn from_engine(engine: PolicyEngine) -> Self {
        Self { engine }
    }

    /// Require `capability` on the project named by the route before any
    /// handler of `route` runs.
    pub fn must<S>(&self, capability: Capability, route: MethodRouter<S>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        route.route_layer(AuthorizeLayer::new(self.engine.clone(), capability))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that enforces one capability per request.
#[derive(Debug, Clone)]
pub struct AuthorizeLayer {
    engine: PolicyEngine,
    capability: Capability,
}

impl AuthorizeLayer {
    pub fn new(engine: PolicyEngine, capability: Capability) -> Self {
        Self { engine, capability }
    }
}

impl<S> Layer<S> for AuthorizeLayer {
    type Service = AuthorizeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthorizeService {
            inner,
            engine: self.engine.clone(),
            capability: self.capability,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct AuthorizeService<S> {
    inner: S,
    engine: PolicyEngine,
    capability: Capability,
}

impl<S> Service<Request<Body>> for AuthorizeService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let engine = self.engine.clone();
        let capability = self.capability;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let (mut parts, body) = request.into_parts();

            // Guarded routes must sit behind the authentication layer.
            let principal = match parts.extensions.get::<Principal>().cloned() {
                Some(principal) => principal,
                None => {
                    error!(
                        path = %parts.uri.path(),
                        capability = %capability,
                        "Guarded route reached without a principal"
                    );
                    return Ok(ApiError::internal("guarded route without authentication")
                        .into_response());
                }
            };

            let project_id = match project_id_from_path(&mut parts).await {
                Ok(id) => id,
                Err(e) => return Ok(e.into_response()),
            };

            match engine.check(&principal, &project_id, capability).await {
                Ok(PolicyDecision::Allow) => {
                    parts.extensions.insert(AuthorizedProject {
                        principal,
                        project_id,
                        capability,
                    });
                    inner.call(Request::from_parts(parts, body)).await
                }
                Ok(PolicyDecision::Deny(reason)) => {
                    warn!(
                        principal = %principal.id,
                        project_id = %project_id,
                        capability = %capability,
                        "Capability denied"
                    );
                    Ok(ApiError::forbidden(format!(
                        "You do not have the {} capability on this project",
                        capability
                    ))
                    .with_internal_message(reason)
                    .into_response())
                }
                Err(e) => Ok(ApiError::with_internal(
                    ErrorCode::StoreUnavailable,
                    "The datastore is temporarily unavailable",
                    e.to_string(),
                )
                .with_source(e)
                .into_response()),
            }
        })
    }
}

/// Read and validate the `project_id` route parameter.
async fn project_id_from_path(parts: &mut Parts) -> Result<ProjectId, ApiError> {
    let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, &())
        .await
        .map_err(|rejection| {
            ApiError::bad_request("Malformed path parameters")
                .with_internal_message(rejection.body_text())
        })?;

    let raw = params
        .get(PROJECT_ID_PARAM)
        .ok_or_else(|| ApiError::bad_request("Missing project id in path"))?;

    ProjectId::parse(raw)
        .map_err(|e| ApiError::bad_request(format!("Invalid project id: {}", e)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
