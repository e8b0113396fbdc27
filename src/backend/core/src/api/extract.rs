//! Extractors whose rejections use the API error envelope.

use axum::{
    extract::FromRequest,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::ApiError;

/// `axum::Json` with rejections reported as [`ApiError`].
///
/// Malformed syntax is a 400, a body that does not fit the target type is a
/// 422 and a missing JSON content type is a 415.
#[derive(Debug, Clone, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}
