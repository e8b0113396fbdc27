//! API middleware for content-type enforcement and the request deadline.

use axum::{
    body::HttpBody,
    extract::Request,
    http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING},
    middleware::Next,
    response::{IntoResponse, Response},
    BoxError,
};
use tower::timeout::error::Elapsed;

use crate::error::{ApiError, ErrorCode};

/// Whether the request carries a body, judged by its framing headers and
/// what the body itself reports.
fn has_body(req: &Request) -> bool {
    let headers = req.headers();

    if let Some(length) = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
    {
        return length > 0;
    }

    headers.contains_key(TRANSFER_ENCODING) || req.body().size_hint().lower() > 0
}

/// `application/json`, parameters such as `charset` allowed.
fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Middleware that rejects request bodies which are not JSON.
///
/// The method does not matter; a GET with a body is checked and a POST
/// without one passes.
pub async fn enforce_json_content_type(req: Request, next: Next) -> Response {
    if has_body(&req) {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());

        match content_type {
            Some(ct) if is_json(ct) => {}
            Some(ct) => {
                return ApiError::with_internal(
                    ErrorCode::UnsupportedMediaType,
                    "Content-Type must be application/json",
                    format!("received content type {}", ct),
                )
                .into_response();
            }
            None => {
                return ApiError::new(
                    ErrorCode::UnsupportedMediaType,
                    "Content-Type header is required for requests with a body",
                )
                .into_response();
            }
        }
    }
    next.run(req).await
}

/// Error handler for the deadline stage.
///
/// `tower::timeout` reports expiry as [`Elapsed`]; anything else reaching
/// here is a defect in a layer below.
pub async fn handle_timeout_error(err: BoxError) -> ApiError {
    if err.is::<Elapsed>() {
        ApiError::new(
            ErrorCode::RequestTimeout,
            "The request did not complete within the server deadline",
        )
    } else {
        ApiError::internal(format!("unhandled pipeline error: {}", err))
    }
}
