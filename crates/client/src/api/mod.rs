//! Backend request wrapper.
//!
//! # Architecture
//!
//! - [`ApiClient`] attaches the bearer token from the [`AuthStore`](crate::auth::AuthStore),
//!   refreshing it first when it is about to expire
//! - Failures are classified into [`ApiError`] variants by transport outcome and
//!   HTTP status
//! - Every classified failure is dispatched to the listeners registered for its
//!   kind, then returned to the caller
//! - A 401 additionally clears the stored session

pub mod client;
pub mod error;
pub mod handlers;

pub use client::ApiClient;
pub use error::{ApiError, ApiErrorKind, ErrorBody};
pub use handlers::{ErrorHandler, ErrorHandlerRegistry, HandlerRegistration};
