//! Request pipeline middleware for the Parrot API.
pub mod access_log;
pub mod auth;
pub mod client_addr;
pub mod introspection;
pub mod recover;

use axum::{body::Body, extract::Request};
use tower_http::request_id::RequestId;

pub use access_log::{AccessLogLayer, AccessLogWriter, AccessRecord};
pub use auth::{AuthLayer, AuthService};
pub use client_addr::{ClientAddr, ClientAddrLayer};
pub use introspection::{
    bearer_token, HttpIntrospector, IntrospectionError, StaticIntrospector, TokenIntrospector,
};
pub use recover::RecoverLayer;

/// Header carrying the request identifier in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The request id assigned by the identification stage, if any.
pub fn request_id_of(request: &Request<Body>) -> Option<String> {
    request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .or_else(|| {
            request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
        })
        .map(str::to_string)
}
