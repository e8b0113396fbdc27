//! Capability-based authorization scoped to projects.
//!
//! This module provides:
//! - **Models**: Principal, ProjectId, Capability and RoleAssignment
//! - **Roles**: Owner, Editor, Viewer and Client with fixed capability sets
//! - **Policy Engine**: decides whether a principal holds a capability on a project
//! - **Guard**: tower layer that enforces a capability before a handler runs
//!
//! # Usage
//!
//! ```rust,ignore
//! use parrot_api::rbac::{Capability, Guard};
//!
//! let guard = Guard::new(store, lookup_timeout);
//!
//! let projects = Router::new()
//!     .route("/:project_id", guard.must(Capability::ViewProject, get(show_project)));
//! ```

pub mod middleware;
pub mod models;
pub mod policy;
pub mod roles;

pub use middleware::{AuthorizeLayer, AuthorizeService, AuthorizedProject, Guard};
pub use models::{
    Capability, InvalidProjectId, Principal, PrincipalId, ProjectId, RoleAssignment, SubjectKind,
};
pub use policy::{PolicyDecision, PolicyEngine};
pub use roles::{Role, UnknownRole};
