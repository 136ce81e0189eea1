//! AutoPro Core - Shared types library.
//!
//! This crate provides the types shared by the AutoPro client components:
//! - `client` - Data-access layer (auth store, request wrapper, cache, audit log)
//! - `cli` - Operator command-line tool
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no storage access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - IDs, roles and permissions, users, sessions, audit entries
//! - [`clock`] - Injectable time source

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod clock;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use types::*;
