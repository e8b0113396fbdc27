//! Error handling for the Parrot API.
//!
//! This module provides:
//! - A single error type with user-facing and internal messages
//! - Machine-readable error codes with HTTP status mapping
//! - Severity-driven logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use parrot_api::error::{ApiError, Result};
//!
//! async fn show(store: &dyn Store, id: &ProjectId) -> Result<Project> {
//!     store
//!         .get_project(id)
//!         .await?
//!         .ok_or_else(|| ApiError::not_found("Project", id.as_str()))
//! }
//! ```

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::db::StoreError;
use crate::middleware::introspection::IntrospectionError;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Request Errors (1000-1099)
    BadRequest,
    ValidationError,
    UnsupportedMediaType,
    RecordNotFound,
    DuplicateRecord,
    RequestTimeout,
    MethodNotAllowed,

    // Store Errors (2000-2099)
    StoreUnavailable,
    DatabaseError,
    SerializationError,

    // Upstream Errors (3000-3099)
    UpstreamUnavailable,

    // Authentication/Authorization (4000-4099)
    Unauthenticated,
    TokenExpired,
    Forbidden,

    // Configuration Errors (5000-5099)
    ConfigurationError,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::BadRequest => 1000,
            Self::ValidationError => 1001,
            Self::UnsupportedMediaType => 1002,
            Self::RecordNotFound => 1003,
            Self::DuplicateRecord => 1004,
            Self::RequestTimeout => 1005,
            Self::MethodNotAllowed => 1006,

            Self::StoreUnavailable => 2000,
            Self::DatabaseError => 2001,
            Self::SerializationError => 2002,

            Self::UpstreamUnavailable => 3000,

            Self::Unauthenticated => 4000,
            Self::TokenExpired => 4001,
            Self::Forbidden => 4002,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::RecordNotFound => StatusCode::NOT_FOUND,
            Self::DuplicateRecord => StatusCode::CONFLICT,
            Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,

            Self::Unauthenticated | Self::TokenExpired => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,

            Self::StoreUnavailable | Self::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            Self::DatabaseError
            | Self::SerializationError
            | Self::ConfigurationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is retryable by the client.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable | Self::UpstreamUnavailable | Self::RequestTimeout
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "request",
            2000..=2099 => "store",
            3000..=3099 => "upstream",
            4000..=4099 => "authentication",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, missing credentials, denied capability)
    Low,
    /// Operational issues (request deadline hit)
    Medium,
    /// Dependency failures (store, introspection authority)
    High,
    /// Defects requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::BadRequest
            | ErrorCode::ValidationError
            | ErrorCode::UnsupportedMediaType
            | ErrorCode::RecordNotFound
            | ErrorCode::DuplicateRecord
            | ErrorCode::MethodNotAllowed
            | ErrorCode::Unauthenticated
            | ErrorCode::TokenExpired
            | ErrorCode::Forbidden => Self::Low,

            ErrorCode::RequestTimeout => Self::Medium,

            ErrorCode::StoreUnavailable
            | ErrorCode::UpstreamUnavailable
            | ErrorCode::DatabaseError
            | ErrorCode::SerializationError => Self::High,

            ErrorCode::ConfigurationError | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The error type returned by handlers, the authentication layer and the
/// capability guard.
///
/// The user message is the only text that reaches the client; the internal
/// message and source are for logs.
#[derive(Error, Debug)]
pub struct ApiError {
    code: ErrorCode,

    user_message: Cow<'static, str>,

    internal_message: Option<String>,

    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl ApiError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500). The message is never shown to clients.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a not found error.
    pub fn not_found(entity_type: &str, entity_id: &str) -> Self {
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
    }

    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn unauthenticated(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn upstream_unavailable(internal_message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::UpstreamUnavailable,
            "The authentication service is unavailable",
            internal_message,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "Critical error"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    internal_message = ?self.internal_message,
                    "Dependency error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Request error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Request rejected"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "parrot_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    pub error: ErrorInfo,
}

/// Error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// User-facing error message
    pub message: String,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&ApiError> for ErrorResponse {
    fn from(error: &ApiError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations
// ═══════════════════════════════════════════════════════════════════════════════

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        let (code, user_msg): (ErrorCode, Cow<'static, str>) = match &error {
            StoreError::NotFound { entity, id } => (
                ErrorCode::RecordNotFound,
                format!("{} not found: {}", entity, id).into(),
            ),
            StoreError::AlreadyExists { entity, id } => (
                ErrorCode::DuplicateRecord,
                format!("{} already exists: {}", entity, id).into(),
            ),
            StoreError::Rejected(reason) => (ErrorCode::ValidationError, reason.clone().into()),
            StoreError::Unavailable(_) | StoreError::Timeout => (
                ErrorCode::StoreUnavailable,
                "The datastore is temporarily unavailable".into(),
            ),
            StoreError::Serialization(_) => (
                ErrorCode::SerializationError,
                "Failed to process stored data".into(),
            ),
            StoreError::Database(_) => {
                (ErrorCode::DatabaseError, "A database error occurred".into())
            }
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<IntrospectionError> for ApiError {
    fn from(error: IntrospectionError) -> Self {
        match &error {
            IntrospectionError::Unauthenticated(reason) => Self::with_internal(
                ErrorCode::Unauthenticated,
                "Authentication credentials are missing or invalid",
                reason.to_string(),
            ),
            IntrospectionError::Expired => Self::new(
                ErrorCode::TokenExpired,
                "The authentication token has expired",
            ),
            IntrospectionError::UpstreamUnavailable(reason) => {
                Self::upstream_unavailable(reason.clone())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let code = match &rejection {
            JsonRejection::MissingJsonContentType(_) => ErrorCode::UnsupportedMediaType,
            JsonRejection::JsonDataError(_) => ErrorCode::ValidationError,
            _ => ErrorCode::BadRequest,
        };
        let message = rejection.body_text();
        Self::with_internal(code, message.clone(), message)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error occurred",
            error.to_string(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
