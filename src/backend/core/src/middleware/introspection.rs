//! Bearer token introspection.
//!
//! Tokens are opaque to this service. Each authenticated request hands its
//! token to an external authority (RFC 7662 style) and receives the subject
//! back:
//!
//! ```text
//! POST {auth.url}{auth.introspection_path}
//! Content-Type: application/x-www-form-urlencoded
//!
//! token=<token>
//!
//! 200 OK
//! { "active": true, "sub": "u-1", "sub_type": "user", "exp": 1735689600, "scope": "read write" }
//! ```

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::rbac::{Principal, SubjectKind};

/// Path appended to the authority base URL when none is configured.
pub const DEFAULT_INTROSPECTION_PATH: &str = "/auth/introspect";

// ═══════════════════════════════════════════════════════════════════════════════
// Error Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Reasons a token did not resolve into a principal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntrospectionError {
    /// No usable credentials, or the authority rejected the token.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("token has expired")]
    Expired,

    /// The authority could not give a trustworthy answer.
    #[error("introspection authority unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl IntrospectionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Expired => "expired",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Introspector Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolves a bearer token into a [`Principal`].
#[async_trait]
pub trait TokenIntrospector: Send + Sync + 'static {
    async fn introspect(&self, token: &str) -> Result<Principal, IntrospectionError>;
}

/// Pull the bearer token out of the `Authorization` header.
///
/// The scheme is matched case-insensitively; an empty token is rejected.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, IntrospectionError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| IntrospectionError::Unauthenticated("missing authorization header".into()))?
        .to_str()
        .map_err(|_| IntrospectionError::Unauthenticated("authorization header is not ASCII".into()))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| IntrospectionError::Unauthenticated("malformed authorization header".into()))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(IntrospectionError::Unauthenticated(format!(
            "unsupported authorization scheme: {}",
            scheme
        )));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(IntrospectionError::Unauthenticated("empty bearer token".into()));
    }
    Ok(token)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Wire Format
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    active: bool,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    sub_type: Option<SubjectKind>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl IntrospectionResponse {
    fn into_principal(self, now: DateTime<Utc>) -> Result<Principal, IntrospectionError> {
        if !self.active {
            return Err(IntrospectionError::Unauthenticated("token is not active".into()));
        }

        let sub = self
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                IntrospectionError::UpstreamUnavailable("active token without subject".into())
            })?;

        let mut principal = Principal::new(sub.as_str(), self.sub_type.unwrap_or_default());

        if let Some(exp) = self.exp {
            let expires_at = Utc.timestamp_opt(exp, 0).single().ok_or_else(|| {
                IntrospectionError::UpstreamUnavailable(format!("invalid exp claim: {}", exp))
            })?;
            if expires_at <= now {
                return Err(IntrospectionError::Expired);
            }
            principal = principal.with_expiry(expires_at);
        }

        if let Some(scope) = self.scope {
            principal = principal.with_scopes(scope.split_whitespace());
        }

        Ok(principal)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP Introspector
// ═══════════════════════════════════════════════════════════════════════════════

/// Introspector that calls the authority over HTTP.
#[derive(Debug, Clone)]
pub struct HttpIntrospector {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpIntrospector {
    /// Build a client for `{base_url}{path}` bounded by `timeout`.
    pub fn new(base_url: &str, path: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), path),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TokenIntrospector for HttpIntrospector {
    async fn introspect(&self, token: &str) -> Result<Principal, IntrospectionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    "introspection request timed out".to_string()
                } else {
                    format!("introspection request failed: {}", e)
                };
                warn!(endpoint = %self.endpoint, error = %e, "Introspection call failed");
                IntrospectionError::UpstreamUnavailable(reason)
            })?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!(status = %response.status(), "Authority rejected token");
                return Err(IntrospectionError::Unauthenticated(format!(
                    "authority rejected token with status {}",
                    response.status()
                )));
            }
            status => {
                warn!(endpoint = %self.endpoint, status = %status, "Unexpected introspection status");
                return Err(IntrospectionError::UpstreamUnavailable(format!(
                    "authority answered with status {}",
                    status
                )));
            }
        }

        let body: IntrospectionResponse = response.json().await.map_err(|e| {
            IntrospectionError::UpstreamUnavailable(format!("malformed introspection body: {}", e))
        })?;

        body.into_principal(Utc::now())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Static Introspector
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed token table, for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIntrospector {
    tokens: std::sync::Arc<DashMap<String, Principal>>,
}

impl StaticIntrospector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }

    pub fn insert(&self, token: impl Into<String>, principal: Principal) {
        self.tokens.insert(token.into(), principal);
    }
}

#[async_trait]
impl TokenIntrospector for StaticIntrospector {
    async fn introspect(&self, token: &str) -> Result<Principal, IntrospectionError> {
        let principal = self
            .tokens
            .get(token)
            .map(|p| p.clone())
            .ok_or_else(|| IntrospectionError::Unauthenticated("unknown token".into()))?;

        if principal.is_expired() {
            return Err(IntrospectionError::Expired);
        }
        Ok(principal)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers_with("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&headers_with("bearer abc")).unwrap(), "abc");

        assert!(bearer_token(&HeaderMap::new()).is_err());
        assert!(bearer_token(&headers_with("Basic dXNlcjpwYXNz")).is_err());
        assert!(bearer_token(&headers_with("Bearer ")).is_err());
        assert!(bearer_token(&headers_with("Bearer")).is_err());
    }

    #[test]
    fn test_response_mapping() {
        let now = Utc::now();

        let inactive = IntrospectionResponse {
            active: false,
            sub: Some("u1".into()),
            sub_type: None,
            exp: None,
            scope: None,
        };
        assert!(matches!(
            inactive.into_principal(now),
            Err(IntrospectionError::Unauthenticated(_))
        ));

        let no_subject = IntrospectionResponse {
            active: true,
            sub: None,
            sub_type: None,
            exp: None,
            scope: None,
        };
        assert!(matches!(
            no_subject.into_principal(now),
            Err(IntrospectionError::UpstreamUnavailable(_))
        ));

        let stale = IntrospectionResponse {
            active: true,
            sub: Some("u1".into()),
            sub_type: None,
            exp: Some(now.timestamp() - 10),
            scope: None,
        };
        assert_eq!(stale.into_principal(now), Err(IntrospectionError::Expired));

        let client = IntrospectionResponse {
            active: true,
            sub: Some("c1".into()),
            sub_type: Some(SubjectKind::Client),
            exp: Some(now.timestamp() + 600),
            scope: Some("read write".into()),
        };
        let principal = client.into_principal(now).unwrap();
        assert_eq!(principal.id.as_str(), "c1");
        assert_eq!(principal.kind, SubjectKind::Client);
        assert!(principal.scopes.contains("write"));
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let introspector =
            HttpIntrospector::new("http://auth:8080/", DEFAULT_INTROSPECTION_PATH, Duration::from_secs(1))
                .unwrap();
        assert_eq!(introspector.endpoint(), "http://auth:8080/auth/introspect");
    }

    #[tokio::test]
    async fn test_static_introspector() {
        let introspector = StaticIntrospector::new().with_token("t1", Principal::user("alice"));

        assert_eq!(introspector.introspect("t1").await.unwrap().id.as_str(), "alice");
        assert!(introspector.introspect("t2").await.is_err());
    }
}
