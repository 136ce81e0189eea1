//! Core types for AutoPro.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod audit;
pub mod id;
pub mod role;
pub mod session;
pub mod user;

pub use audit::{AuditEventType, AuditLevel, AuditLogEntry};
pub use id::*;
pub use role::{Permission, Role, RoleParseError};
pub use session::{EXPIRY_BUFFER_MS, Session};
pub use user::{AuthProvider, AuthUser};
