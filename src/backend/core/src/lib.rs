#![allow(clippy::result_large_err)]
//! # Parrot API Core
//!
//! Request core of the Parrot localization service.
//!
//! ## Architecture
//!
//! - **Pipeline**: request id, client address, access log, panic recovery,
//!   deadline, path normalization and content-type checks around the router
//! - **Authentication**: bearer tokens validated by an introspection authority
//! - **RBAC**: per-project roles mapped to fixed capabilities, enforced by a guard
//! - **Store**: persistence behind a trait, in memory or PostgreSQL
//! - **Startup**: readiness loop that holds boot until the store answers
//! - **Observability**: structured logging, metrics and optional OTLP tracing

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod rbac;
pub mod startup;

pub use error::{ApiError, ErrorCode, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{build_app, build_pipeline, build_router, App, AppState, PipelineConfig};
    pub use crate::db::{InMemoryStore, PgStore, Store, StoreError};
    pub use crate::error::{ApiError, ErrorCode, ErrorSeverity, Result};
    pub use crate::middleware::{
        AccessLogLayer, AccessLogWriter, AuthLayer, ClientAddr, HttpIntrospector,
        IntrospectionError, StaticIntrospector, TokenIntrospector,
    };
    pub use crate::rbac::{
        AuthorizedProject, Capability, Guard, PolicyDecision, PolicyEngine, Principal,
        ProjectId, Role, RoleAssignment, SubjectKind,
    };
    pub use crate::startup::{wait_until_ready, RetryError, RetryPolicy, TokioSleeper};
}
