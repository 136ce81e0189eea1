//! AutoPro client data-access layer.
//!
//! Everything the UI needs to talk to the AutoPro backend:
//!
//! - [`auth`] - Session persistence and role/permission checks
//! - [`api`] - Request wrapper with token refresh and error classification
//! - [`cache`] - TTL response cache
//! - [`mutation`] - Optimistic mutations with retry
//! - [`prefetch`] - Debounced prefetching into the cache
//! - [`audit`] - Audit trail with export and remote forwarding
//! - [`state`] - [`ClientState`], which wires the above together

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod audit;
pub mod auth;
pub mod cache;
pub mod config;
pub mod mutation;
pub mod prefetch;
pub mod state;

pub use api::{ApiClient, ApiError, ApiErrorKind};
pub use config::{ClientConfig, ConfigError};
pub use state::ClientState;
