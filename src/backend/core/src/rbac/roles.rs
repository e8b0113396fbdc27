//! Project roles and the capabilities each one grants.
//!
//! | Role    | Description                                                  |
//! |---------|--------------------------------------------------------------|
//! | Owner   | Every capability, including deleting the project             |
//! | Editor  | Edit project keys and all locale data; read memberships      |
//! | Viewer  | Read-only access to the project, its members and locales     |
//! | Client  | API client access: read the project, read and update locales |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::models::Capability;

/// A role held by a principal inside one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Editor,
    Viewer,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

const OWNER_CAPABILITIES: &[Capability] = &Capability::ALL;

const EDITOR_CAPABILITIES: &[Capability] = &[
    Capability::ViewProject,
    Capability::UpdateProject,
    Capability::ViewProjectRoles,
    Capability::ViewLocales,
    Capability::CreateLocales,
    Capability::UpdateLocales,
    Capability::DeleteLocales,
];

const VIEWER_CAPABILITIES: &[Capability] = &[
    Capability::ViewProject,
    Capability::ViewProjectRoles,
    Capability::ViewLocales,
];

const CLIENT_CAPABILITIES: &[Capability] = &[
    Capability::ViewProject,
    Capability::ViewLocales,
    Capability::UpdateLocales,
];

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
            Self::Client => "client",
        }
    }

    /// The fixed capability set of this role.
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Self::Owner => OWNER_CAPABILITIES,
            Self::Editor => EDITOR_CAPABILITIES,
            Self::Viewer => VIEWER_CAPABILITIES,
            Self::Client => CLIENT_CAPABILITIES,
        }
    }

    pub fn grants(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Roles that may be given to a user through the membership endpoints.
    /// `Client` is implied by owning an API client and never assigned.
    pub fn is_assignable(&self) -> bool {
        !matches!(self, Self::Client)
    }

    pub fn all() -> [Role; 4] {
        [Self::Owner, Self::Editor, Self::Viewer, Self::Client]
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "editor" => Ok(Self::Editor),
            "viewer" => Ok(Self::Viewer),
            "client" => Ok(Self::Client),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_holds_every_capability() {
        for capability in Capability::ALL {
            assert!(Role::Owner.grants(capability), "owner lacks {capability}");
        }
    }

    #[test]
    fn test_viewer_is_read_only() {
        assert!(Role::Viewer.grants(Capability::ViewProject));
        assert!(Role::Viewer.grants(Capability::ViewLocales));
        assert!(!Role::Viewer.grants(Capability::DeleteProject));
        assert!(!Role::Viewer.grants(Capability::UpdateLocales));
        assert!(!Role::Viewer.grants(Capability::ManageApiClients));
    }

    #[test]
    fn test_editor_cannot_manage_membership() {
        assert!(Role::Editor.grants(Capability::CreateLocales));
        assert!(!Role::Editor.grants(Capability::AssignRoles));
        assert!(!Role::Editor.grants(Capability::RevokeRoles));
        assert!(!Role::Editor.grants(Capability::DeleteProject));
    }

    #[test]
    fn test_client_role() {
        assert!(Role::Client.grants(Capability::UpdateLocales));
        assert!(!Role::Client.grants(Capability::CreateLocales));
        assert!(!Role::Client.is_assignable());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("editor".parse::<Role>(), Ok(Role::Editor));
        assert!("admin".parse::<Role>().is_err());
        for role in Role::all() {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
    }
}
