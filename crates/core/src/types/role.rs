//! Roles and permissions.
//!
//! Each [`Role`] implies a fixed set of default [`Permission`]s. A user's
//! explicit permissions are added on top of the role defaults; they never
//! remove anything the role grants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when parsing a role or permission from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleParseError {
    #[error("invalid role: {0}")]
    Role(String),
    #[error("invalid permission: {0}")]
    Permission(String),
}

/// User role with different permission levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Unauthenticated visitor; catalog access only.
    #[default]
    Guest,
    /// Registered customer.
    User,
    /// Fleet and order management.
    Manager,
    /// Full access. Satisfies every role check.
    Admin,
}

impl Role {
    /// All roles, lowest privilege first.
    pub const ALL: [Self; 4] = [Self::Guest, Self::User, Self::Manager, Self::Admin];

    /// Permissions granted by this role regardless of per-user grants.
    #[must_use]
    pub const fn default_permissions(self) -> &'static [Permission] {
        match self {
            Self::Guest | Self::User => &[Permission::ReadCars],
            Self::Manager => &[
                Permission::ReadCars,
                Permission::CreateCars,
                Permission::UpdateCars,
                Permission::ManageOrders,
            ],
            Self::Admin => &Permission::ALL,
        }
    }

    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::User => "user",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| RoleParseError::Role(s.to_owned()))
    }
}

/// A capability tag checked by the UI before exposing an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "read:cars")]
    ReadCars,
    #[serde(rename = "create:cars")]
    CreateCars,
    #[serde(rename = "update:cars")]
    UpdateCars,
    #[serde(rename = "delete:cars")]
    DeleteCars,
    #[serde(rename = "read:users")]
    ReadUsers,
    #[serde(rename = "create:users")]
    CreateUsers,
    #[serde(rename = "update:users")]
    UpdateUsers,
    #[serde(rename = "delete:users")]
    DeleteUsers,
    #[serde(rename = "manage:orders")]
    ManageOrders,
    #[serde(rename = "read:analytics")]
    ReadAnalytics,
    #[serde(rename = "manage:settings")]
    ManageSettings,
}

impl Permission {
    /// The full permission universe.
    pub const ALL: [Self; 11] = [
        Self::ReadCars,
        Self::CreateCars,
        Self::UpdateCars,
        Self::DeleteCars,
        Self::ReadUsers,
        Self::CreateUsers,
        Self::UpdateUsers,
        Self::DeleteUsers,
        Self::ManageOrders,
        Self::ReadAnalytics,
        Self::ManageSettings,
    ];

    /// Returns the `action:resource` tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadCars => "read:cars",
            Self::CreateCars => "create:cars",
            Self::UpdateCars => "update:cars",
            Self::DeleteCars => "delete:cars",
            Self::ReadUsers => "read:users",
            Self::CreateUsers => "create:users",
            Self::UpdateUsers => "update:users",
            Self::DeleteUsers => "delete:users",
            Self::ManageOrders => "manage:orders",
            Self::ReadAnalytics => "read:analytics",
            Self::ManageSettings => "manage:settings",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Permission {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|permission| permission.as_str() == s)
            .ok_or_else(|| RoleParseError::Permission(s.to_owned()))
    }
}
