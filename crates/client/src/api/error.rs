//! Error taxonomy for backend requests.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Classification of a failed request. Used as the key for error handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// The request never produced an HTTP response.
    Network,
    /// 401/403, or a missing or rejected refresh token.
    Auth,
    /// 400/422.
    Validation,
    /// 5xx.
    Server,
    /// Anything else.
    Unknown,
}

impl ApiErrorKind {
    pub const ALL: [Self; 5] = [
        Self::Network,
        Self::Auth,
        Self::Validation,
        Self::Server,
        Self::Unknown,
    ];

    /// Classify a non-success HTTP status.
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Auth,
            400 | 422 => Self::Validation,
            500..=599 => Self::Server,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "NETWORK",
            Self::Auth => "AUTH",
            Self::Validation => "VALIDATION",
            Self::Server => "SERVER",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload shared by every error variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBody {
    /// Human-readable message, taken from the response body when available.
    pub message: String,
    /// HTTP status, when a response was received.
    pub status: Option<StatusCode>,
    /// Parsed JSON error body, when one was received and parsed.
    pub details: Option<Value>,
}

impl ErrorBody {
    /// A body with only a message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            details: None,
        }
    }

    #[must_use]
    pub const fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A failed backend request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// Transport failure (DNS, connection refused, reset, ...).
    #[error("network error: {}", .0.message)]
    Network(ErrorBody),

    /// Authentication or authorization failure.
    #[error("auth error: {}", .0.message)]
    Auth(ErrorBody),

    /// The backend rejected the input.
    #[error("validation error: {}", .0.message)]
    Validation(ErrorBody),

    /// The backend failed.
    #[error("server error: {}", .0.message)]
    Server(ErrorBody),

    /// Unclassified failure.
    #[error("{}", .0.message)]
    Unknown(ErrorBody),
}

impl ApiError {
    /// Build an error of the given kind.
    #[must_use]
    pub const fn new(kind: ApiErrorKind, body: ErrorBody) -> Self {
        match kind {
            ApiErrorKind::Network => Self::Network(body),
            ApiErrorKind::Auth => Self::Auth(body),
            ApiErrorKind::Validation => Self::Validation(body),
            ApiErrorKind::Server => Self::Server(body),
            ApiErrorKind::Unknown => Self::Unknown(body),
        }
    }

    /// Wrap a transport failure.
    #[must_use]
    pub fn network(cause: &impl std::fmt::Display) -> Self {
        Self::Network(ErrorBody::message(format!(
            "network failure while performing request: {cause}"
        )))
    }

    /// Build an error from a non-success response.
    ///
    /// `details` is the parsed JSON body, if it parsed. Its `message` field is
    /// used when present; otherwise a message is derived from the status.
    #[must_use]
    pub fn from_response(status: StatusCode, details: Option<Value>) -> Self {
        let message = details
            .as_ref()
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
            .map_or_else(
                || {
                    format!(
                        "API error: {}",
                        status.canonical_reason().unwrap_or("unexpected status")
                    )
                },
                ToOwned::to_owned,
            );

        let mut body = ErrorBody::message(message).with_status(status);
        body.details = details;

        Self::new(ApiErrorKind::from_status(status), body)
    }

    #[must_use]
    pub const fn kind(&self) -> ApiErrorKind {
        match self {
            Self::Network(_) => ApiErrorKind::Network,
            Self::Auth(_) => ApiErrorKind::Auth,
            Self::Validation(_) => ApiErrorKind::Validation,
            Self::Server(_) => ApiErrorKind::Server,
            Self::Unknown(_) => ApiErrorKind::Unknown,
        }
    }

    #[must_use]
    pub const fn body(&self) -> &ErrorBody {
        match self {
            Self::Network(body)
            | Self::Auth(body)
            | Self::Validation(body)
            | Self::Server(body)
            | Self::Unknown(body) => body,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.body().message
    }

    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        self.body().status
    }

    #[must_use]
    pub const fn details(&self) -> Option<&Value> {
        self.body().details.as_ref()
    }

    /// True for a 401, which invalidates the stored session.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Auth(body) if body.status == Some(StatusCode::UNAUTHORIZED))
    }
}
