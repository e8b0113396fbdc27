//! Authentication middleware.
//!
//! Resolves the bearer token through a [`TokenIntrospector`] and inserts the
//! resulting [`Principal`] into request extensions. Requests that fail are
//! answered here and never reach the inner service.
//!
//! # Example
//!
//! ```rust,ignore
//! use parrot_api::middleware::AuthLayer;
//!
//! let app = Router::new()
//!     .route("/users/self", get(current_user))
//!     .route_layer(AuthLayer::new(introspector));
//! ```

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderValue},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use metrics::counter;
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::debug;

use super::introspection::{bearer_token, IntrospectionError, TokenIntrospector};
use crate::error::ApiError;
use crate::rbac::Principal;

/// Turn an introspection failure into the response sent to the caller.
fn rejection(error: IntrospectionError) -> Response {
    counter!("auth_errors_total", "error_type" => error.kind()).increment(1);

    let challenge = !matches!(error, IntrospectionError::UpstreamUnavailable(_));
    let mut response = ApiError::from(error).into_response();
    if challenge {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    response
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Authentication layer for Tower.
#[derive(Clone)]
pub struct AuthLayer {
    introspector: Arc<dyn TokenIntrospector>,
}

impl AuthLayer {
    pub fn new(introspector: Arc<dyn TokenIntrospector>) -> Self {
        Self { introspector }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            introspector: self.introspector.clone(),
        }
    }
}

/// Authentication service.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    introspector: Arc<dyn TokenIntrospector>,
}

impl<S> Service<Request<Body>> for AuthService<S>
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

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let introspector = self.introspector.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let token = match bearer_token(request.headers()) {
                Ok(token) => token.to_string(),
                Err(e) => return Ok(rejection(e)),
            };

            match introspector.introspect(&token).await {
                Ok(principal) => {
                    debug!(
                        principal = %principal.id,
                        kind = %principal.kind,
                        "Request authenticated"
                    );
                    counter!("auth_success_total", "kind" => principal.kind.as_str()).increment(1);
                    request.extensions_mut().insert(principal);
                    inner.call(request).await
                }
                Err(e) => Ok(rejection(e)),
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Extractor
// ═══════════════════════════════════════════════════════════════════════════════

/// Extractor for the authenticated principal in handlers.
#[axum::async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| ApiError::unauthenticated("Authentication credentials are required"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
