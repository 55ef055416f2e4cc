//! Session roles and the capabilities each one grants.
//!
//! Role names must match the `role` column values the backend stores
//! and returns from `/api/auth/login`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_EDITOR: &str = "editor";

/// Role carried by an authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
}

/// An action or view that is gated on the session role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// See the job queue and node list.
    ViewDashboard,
    /// Submit a workflow file for execution.
    UploadWorkflow,
    /// Change per-user preferences (theme).
    EditSettings,
    /// Enable/disable, add, edit and remove worker nodes.
    ManageNodes,
    /// Create, edit and delete user accounts.
    ManageUsers,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => ROLE_ADMIN,
            Role::Editor => ROLE_EDITOR,
        }
    }

    /// Whether this role is granted `capability`.
    pub fn can(&self, capability: Capability) -> bool {
        match capability {
            Capability::ViewDashboard | Capability::UploadWorkflow | Capability::EditSettings => {
                true
            }
            Capability::ManageNodes | Capability::ManageUsers => *self == Role::Admin,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ROLE_ADMIN => Ok(Role::Admin),
            ROLE_EDITOR => Ok(Role::Editor),
            other => Err(CoreError::Validation(format!("Unknown role '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editor_cannot_manage() {
        assert!(Role::Editor.can(Capability::ViewDashboard));
        assert!(Role::Editor.can(Capability::UploadWorkflow));
        assert!(!Role::Editor.can(Capability::ManageNodes));
        assert!(!Role::Editor.can(Capability::ManageUsers));
    }

    #[test]
    fn admin_can_do_everything() {
        for cap in [
            Capability::ViewDashboard,
            Capability::UploadWorkflow,
            Capability::EditSettings,
            Capability::ManageNodes,
            Capability::ManageUsers,
        ] {
            assert!(Role::Admin.can(cap), "admin should have {cap:?}");
        }
    }

    #[test]
    fn parse_known_roles() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("editor".parse::<Role>().unwrap(), Role::Editor);
    }

    #[test]
    fn parse_unknown_role_fails() {
        assert!(matches!("Admin".parse::<Role>(), Err(CoreError::Validation(_))));
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        assert_eq!(serde_json::to_string(&Role::Editor).unwrap(), "\"editor\"");
        let role: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(role, Role::Admin);
    }
}
