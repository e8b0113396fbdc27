//! Client address resolution.
//!
//! Proxy headers are only honored when the deployment says a trusted proxy
//! sits in front of the service; otherwise any caller could spoof them.

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    response::Response,
};
use std::{
    convert::Infallible,
    fmt,
    net::{IpAddr, SocketAddr},
    task::{Context, Poll},
};
use tower::{Layer, Service};

/// Resolved address of the caller, if one could be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub Option<IpAddr>);

impl fmt::Display for ClientAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ip) => write!(f, "{}", ip),
            None => f.write_str("unknown"),
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ClientAddr>()
            .copied()
            .unwrap_or(ClientAddr(None)))
    }
}

/// First parseable address from `X-Forwarded-For`, then `X-Real-IP`.
fn from_proxy_headers(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok());

    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
    })
}

pub fn resolve(request: &Request<Body>, trust_proxy_headers: bool) -> ClientAddr {
    let proxied = if trust_proxy_headers {
        from_proxy_headers(request.headers())
    } else {
        None
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());

    ClientAddr(proxied.or(peer))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer and Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default)]
pub struct ClientAddrLayer {
    trust_proxy_headers: bool,
}

impl ClientAddrLayer {
    pub fn new(trust_proxy_headers: bool) -> Self {
        Self {
            trust_proxy_headers,
        }
    }
}

impl<S> Layer<S> for ClientAddrLayer {
    type Service = ClientAddrService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClientAddrService {
            inner,
            trust_proxy_headers: self.trust_proxy_headers,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientAddrService<S> {
    inner: S,
    trust_proxy_headers: bool,
}

impl<S> Service<Request<Body>> for ClientAddrService<S>
where
    S: Service<Request<Body>, Response = Response>,
{
    type Response = Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let addr = resolve(&request, self.trust_proxy_headers);
        request.extensions_mut().insert(addr);
        self.inner.call(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_from(peer: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        request
    }

    #[test]
    fn test_untrusted_headers_are_ignored() {
        let request = request_from("10.0.0.5:4000", &[("x-forwarded-for", "203.0.113.9")]);
        assert_eq!(
            resolve(&request, false).0,
            Some("10.0.0.5".parse().unwrap())
        );
    }

    #[test]
    fn test_trusted_headers_first_hop() {
        let request = request_from(
            "10.0.0.5:4000",
            &[("x-forwarded-for", "203.0.113.9, 10.0.0.1")],
        );
        assert_eq!(
            resolve(&request, true).0,
            Some("203.0.113.9".parse().unwrap())
        );

        let request = request_from("10.0.0.5:4000", &[("x-real-ip", "198.51.100.7")]);
        assert_eq!(
            resolve(&request, true).0,
            Some("198.51.100.7".parse().unwrap())
        );
    }

    #[test]
    fn test_garbage_header_falls_back_to_peer() {
        let request = request_from("10.0.0.5:4000", &[("x-forwarded-for", "not-an-ip")]);
        assert_eq!(
            resolve(&request, true).0,
            Some("10.0.0.5".parse().unwrap())
        );
    }

    #[test]
    fn test_no_connect_info() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(resolve(&request, true), ClientAddr(None));
        assert_eq!(ClientAddr(None).to_string(), "unknown");
    }
}
