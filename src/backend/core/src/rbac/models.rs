//! Authorization data models: principals, project identifiers, capabilities
//! and role assignments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::roles::Role;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Stable subject identifier reported by the introspection authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Maximum accepted length of a project identifier.
pub const MAX_PROJECT_ID_LEN: usize = 64;

/// Rejection produced when a path segment is not a usable project identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidProjectId {
    #[error("project id is empty")]
    Empty,

    #[error("project id exceeds {MAX_PROJECT_ID_LEN} characters")]
    TooLong,

    #[error("project id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Opaque project identifier taken from the route path.
///
/// Only the shape is validated here; whether the project exists is a store
/// concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Validate a raw path segment.
    pub fn parse(raw: &str) -> Result<Self, InvalidProjectId> {
        if raw.is_empty() {
            return Err(InvalidProjectId::Empty);
        }
        if raw.len() > MAX_PROJECT_ID_LEN {
            return Err(InvalidProjectId::TooLong);
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(InvalidProjectId::InvalidCharacter(c));
        }
        Ok(Self(raw.to_string()))
    }

    /// Generate a fresh identifier for a newly created project.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = InvalidProjectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Principal
// ═══════════════════════════════════════════════════════════════════════════════

/// What kind of subject a token was issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    #[default]
    User,
    Client,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated identity resolved from a bearer token.
///
/// Built per request by the authentication layer and dropped with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: PrincipalId,
    pub kind: SubjectKind,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: HashSet<String>,
}

impl Principal {
    pub fn new(id: impl Into<PrincipalId>, kind: SubjectKind) -> Self {
        Self {
            id: id.into(),
            kind,
            expires_at: None,
            scopes: HashSet::new(),
        }
    }

    pub fn user(id: &str) -> Self {
        Self::new(id, SubjectKind::User)
    }

    pub fn client(id: &str) -> Self {
        Self::new(id, SubjectKind::Client)
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| exp <= Utc::now())
    }

    pub fn is_user(&self) -> bool {
        self.kind == SubjectKind::User
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Capability
// ═══════════════════════════════════════════════════════════════════════════════

/// A named, project-scoped permission.
///
/// The set is closed: routes name a variant, so a misspelled capability is a
/// compile error rather than a silent deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    ViewProject,
    DeleteProject,
    UpdateProject,
    ViewProjectRoles,
    AssignRoles,
    UpdateRoles,
    RevokeRoles,
    ManageApiClients,
    ViewLocales,
    CreateLocales,
    UpdateLocales,
    DeleteLocales,
}

impl Capability {
    pub const ALL: [Capability; 12] = [
        Self::ViewProject,
        Self::DeleteProject,
        Self::UpdateProject,
        Self::ViewProjectRoles,
        Self::AssignRoles,
        Self::UpdateRoles,
        Self::RevokeRoles,
        Self::ManageApiClients,
        Self::ViewLocales,
        Self::CreateLocales,
        Self::UpdateLocales,
        Self::DeleteLocales,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ViewProject => "view-project",
            Self::DeleteProject => "delete-project",
            Self::UpdateProject => "update-project",
            Self::ViewProjectRoles => "view-project-roles",
            Self::AssignRoles => "assign-roles",
            Self::UpdateRoles => "update-roles",
            Self::RevokeRoles => "revoke-roles",
            Self::ManageApiClients => "manage-api-clients",
            Self::ViewLocales => "view-locales",
            Self::CreateLocales => "create-locales",
            Self::UpdateLocales => "update-locales",
            Self::DeleteLocales => "delete-locales",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role Assignment
// ═══════════════════════════════════════════════════════════════════════════════

/// A principal's role inside one project, as read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub principal_id: PrincipalId,
    pub project_id: ProjectId,
    pub role: Role,
}

impl RoleAssignment {
    pub fn new(principal_id: PrincipalId, project_id: ProjectId, role: Role) -> Self {
        Self {
            principal_id,
            project_id,
            role,
        }
    }

    /// Whether this assignment grants `capability`.
    pub fn grants(&self, capability: Capability) -> bool {
        self.role.grants(capability)
    }
}
