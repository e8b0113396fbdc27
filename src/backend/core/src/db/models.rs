//! Resource records exchanged with the store.
//!
//! Identity and authorization types (principal, project id, role) live in
//! `crate::rbac::models`; this module holds the resources handlers serve.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::rbac::{ProjectId, Role};

/// A registered user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    /// Argon2 PHC string; never serialized to clients.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
}

/// Fields required to register a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

/// A project and the translation keys it defines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub keys: Vec<String>,
}

/// A user's membership in a project, as listed by the project users endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectUser {
    pub user_id: String,
    pub project_id: ProjectId,
    pub email: String,
    pub name: String,
    pub role: Role,
}

/// An API client registered inside a project.
///
/// `secret` is only populated right after creation or a secret reset; the
/// store keeps a SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectClient {
    pub client_id: String,
    pub project_id: ProjectId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Translations of a project's keys into one locale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locale {
    pub project_id: ProjectId,
    pub ident: String,
    pub language: String,
    pub country: String,
    pub pairs: BTreeMap<String, String>,
}

/// Fields required to create a locale.
#[derive(Debug, Clone, Deserialize)]
pub struct NewLocale {
    pub ident: String,
    pub language: String,
    pub country: String,
}
