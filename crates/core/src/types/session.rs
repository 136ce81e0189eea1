//! Token session issued by the auth endpoints.

use secrecy::{ExposeSecret, SecretString};

/// A session counts as expired this many milliseconds before `expires_at`,
/// so a token is never attached to a request that may outlive it.
pub const EXPIRY_BUFFER_MS: i64 = 5_000;

/// Access/refresh token pair with the access token's expiry.
#[derive(Debug, Clone)]
pub struct Session {
    /// Bearer token attached to authenticated requests.
    pub access_token: SecretString,
    /// Token exchanged at `/auth/refresh` for a new pair.
    pub refresh_token: SecretString,
    /// Unix timestamp in milliseconds when the access token expires.
    pub expires_at: i64,
}

impl Session {
    /// Create a session from raw token strings.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: i64,
    ) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
            expires_at,
        }
    }

    /// Build a session from an `expiresIn` (seconds) response field.
    #[must_use]
    pub fn from_expires_in(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in_secs: i64,
        now_ms: i64,
    ) -> Self {
        Self::new(
            access_token,
            refresh_token,
            now_ms.saturating_add(expires_in_secs.saturating_mul(1000)),
        )
    }

    /// Whether the access token should be treated as expired at `now_ms`.
    #[must_use]
    pub const fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at.saturating_sub(EXPIRY_BUFFER_MS)
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.expires_at == other.expires_at
            && self.access_token.expose_secret() == other.access_token.expose_secret()
            && self.refresh_token.expose_secret() == other.refresh_token.expose_secret()
    }
}

impl Eq for Session {}
