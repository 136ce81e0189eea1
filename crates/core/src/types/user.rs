//! Authenticated user identity.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::id::UserId;
use super::role::{Permission, Role};

/// How the user signed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthProvider {
    Email,
    Google,
    Facebook,
}

/// The user attached to a session.
///
/// Serialized in camelCase to match the backend's `user` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: Role,
    /// Grants on top of the role defaults.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub permissions: BTreeSet<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_provider: Option<AuthProvider>,
}

impl AuthUser {
    /// Create a user with only the required fields set.
    #[must_use]
    pub fn new(id: impl Into<UserId>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            role,
            permissions: BTreeSet::new(),
            avatar: None,
            auth_provider: None,
        }
    }

    /// Add an explicit permission grant.
    #[must_use]
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    /// Set the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Admin satisfies every role check; any other role matches only itself.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.role == Role::Admin || self.role == role
    }

    /// Explicit grants first, then the role table.
    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
            || self.role.default_permissions().contains(&permission)
    }

    /// Union of role defaults and explicit grants.
    #[must_use]
    pub fn effective_permissions(&self) -> BTreeSet<Permission> {
        self.role
            .default_permissions()
            .iter()
            .copied()
            .chain(self.permissions.iter().copied())
            .collect()
    }
}
