//! Audit log entry types.

use serde::{Deserialize, Serialize};

use super::id::UserId;
use super::role::Role;

/// Kind of user or admin action being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    UserLogin,
    UserLogout,
    UserCreated,
    UserUpdated,
    UserDeleted,
    UserRoleChanged,
    CarCreated,
    CarUpdated,
    CarDeleted,
    BookingCreated,
    BookingUpdated,
    BookingCancelled,
    SettingsUpdated,
    ApiError,
    PermissionDenied,
}

impl AuditEventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserLogin => "USER_LOGIN",
            Self::UserLogout => "USER_LOGOUT",
            Self::UserCreated => "USER_CREATED",
            Self::UserUpdated => "USER_UPDATED",
            Self::UserDeleted => "USER_DELETED",
            Self::UserRoleChanged => "USER_ROLE_CHANGED",
            Self::CarCreated => "CAR_CREATED",
            Self::CarUpdated => "CAR_UPDATED",
            Self::CarDeleted => "CAR_DELETED",
            Self::BookingCreated => "BOOKING_CREATED",
            Self::BookingUpdated => "BOOKING_UPDATED",
            Self::BookingCancelled => "BOOKING_CANCELLED",
            Self::SettingsUpdated => "SETTINGS_UPDATED",
            Self::ApiError => "API_ERROR",
            Self::PermissionDenied => "PERMISSION_DENIED",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditLevel {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub user_id: UserId,
    pub user_name: String,
    pub user_role: Role,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    pub event_type: AuditEventType,
    pub level: AuditLevel,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub app_version: String,
}
