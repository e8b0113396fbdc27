//! Persistence boundary for the Parrot API.
//!
//! Handlers, the capability policy and the startup probe only see the
//! [`Store`] trait. Two implementations ship with the crate:
//!
//! - [`memory::InMemoryStore`]: lock-free maps, used by tests and local runs
//! - [`postgres::PgStore`]: PostgreSQL via sqlx, used in production
//!
//! Implementations must tolerate unbounded concurrent reads; the capability
//! guard calls [`Store::lookup_role_assignment`] on every guarded request.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

pub use memory::InMemoryStore;
pub use models::{Locale, NewLocale, NewUser, Project, ProjectClient, ProjectUser, User};
pub use postgres::PgStore;

use crate::rbac::{PrincipalId, ProjectId, Role, RoleAssignment, SubjectKind};

/// Errors surfaced by store implementations.
///
/// `Unavailable` and `Timeout` mean the store could not answer; they are
/// distinct from a lookup that found nothing, which is `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("operation rejected: {0}")]
    Rejected(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    /// Whether the failure means the store itself is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Everything the API needs from persistence.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Liveness probe used by the startup retry loop.
    async fn ping(&self) -> StoreResult<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Authorization
    // ─────────────────────────────────────────────────────────────────────────

    /// The role a subject holds in a project, or `None` when it has none.
    async fn lookup_role_assignment(
        &self,
        principal: &PrincipalId,
        kind: SubjectKind,
        project: &ProjectId,
    ) -> StoreResult<Option<RoleAssignment>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    async fn get_user(&self, id: &str) -> StoreResult<Option<User>>;

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Projects
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a project and make `owner` its owner in one step.
    async fn create_project(&self, owner: &PrincipalId, name: &str) -> StoreResult<Project>;

    async fn get_project(&self, id: &ProjectId) -> StoreResult<Option<Project>>;

    async fn delete_project(&self, id: &ProjectId) -> StoreResult<()>;

    async fn list_user_projects(&self, user: &PrincipalId) -> StoreResult<Vec<Project>>;

    async fn add_project_key(&self, id: &ProjectId, key: &str) -> StoreResult<Project>;

    /// Rename a key in the project and in every locale of the project.
    async fn rename_project_key(
        &self,
        id: &ProjectId,
        old_key: &str,
        new_key: &str,
    ) -> StoreResult<Project>;

    /// Remove a key from the project and from every locale of the project.
    async fn delete_project_key(&self, id: &ProjectId, key: &str) -> StoreResult<Project>;

    // ─────────────────────────────────────────────────────────────────────────
    // Project membership
    // ─────────────────────────────────────────────────────────────────────────

    async fn list_project_users(&self, id: &ProjectId) -> StoreResult<Vec<ProjectUser>>;

    async fn assign_project_user(
        &self,
        id: &ProjectId,
        user_id: &str,
        role: Role,
    ) -> StoreResult<ProjectUser>;

    /// Change a member's role. Demoting the last owner is rejected.
    async fn update_project_user_role(
        &self,
        id: &ProjectId,
        user_id: &str,
        role: Role,
    ) -> StoreResult<ProjectUser>;

    /// Remove a member. Revoking the last owner is rejected.
    async fn revoke_project_user(&self, id: &ProjectId, user_id: &str) -> StoreResult<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // API clients
    // ─────────────────────────────────────────────────────────────────────────

    async fn list_project_clients(&self, id: &ProjectId) -> StoreResult<Vec<ProjectClient>>;

    async fn get_project_client(
        &self,
        id: &ProjectId,
        client_id: &str,
    ) -> StoreResult<Option<ProjectClient>>;

    /// Register a client; `secret_digest` is what gets persisted.
    async fn create_project_client(
        &self,
        id: &ProjectId,
        name: &str,
        secret_digest: &str,
    ) -> StoreResult<ProjectClient>;

    async fn reset_project_client_secret(
        &self,
        id: &ProjectId,
        client_id: &str,
        secret_digest: &str,
    ) -> StoreResult<ProjectClient>;

    async fn rename_project_client(
        &self,
        id: &ProjectId,
        client_id: &str,
        name: &str,
    ) -> StoreResult<ProjectClient>;

    async fn delete_project_client(&self, id: &ProjectId, client_id: &str) -> StoreResult<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Locales
    // ─────────────────────────────────────────────────────────────────────────

    async fn list_locales(&self, id: &ProjectId) -> StoreResult<Vec<Locale>>;

    /// Create a locale with an empty translation for every project key.
    async fn create_locale(&self, id: &ProjectId, locale: NewLocale) -> StoreResult<Locale>;

    async fn get_locale(&self, id: &ProjectId, ident: &str) -> StoreResult<Option<Locale>>;

    /// Overwrite translations for keys the project defines; other keys are
    /// rejected.
    async fn update_locale_pairs(
        &self,
        id: &ProjectId,
        ident: &str,
        pairs: BTreeMap<String, String>,
    ) -> StoreResult<Locale>;

    async fn delete_locale(&self, id: &ProjectId, ident: &str) -> StoreResult<()>;
}
