//! Session persistence and role/permission checks.
//!
//! The [`AuthStore`] owns the session: it writes the token pair, the expiry and
//! the serialized user under fixed keys of a [`SessionStorage`], and answers
//! authentication, role and permission questions from what is stored.
//!
//! All checks here are client-side conveniences for the UI. The backend is the
//! authority on what a token may do.

pub mod storage;

use std::collections::BTreeSet;
use std::sync::Arc;

use autopro_core::{AuthUser, Clock, Permission, Role, Session, SystemClock};
use secrecy::ExposeSecret;
use tracing::warn;

pub use storage::{FileStorage, MemoryStorage, SessionStorage, StorageError};

/// Storage key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "app_access_token";
/// Storage key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "app_refresh_token";
/// Storage key for the access token expiry (Unix milliseconds).
pub const TOKEN_EXPIRY_KEY: &str = "app_token_expiry";
/// Storage key for the JSON-serialized user.
pub const USER_DATA_KEY: &str = "app_user";

const ALL_KEYS: [&str; 4] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, TOKEN_EXPIRY_KEY, USER_DATA_KEY];

/// Persisted session and identity.
///
/// Cheap to clone; clones share the same storage.
#[derive(Debug, Clone)]
pub struct AuthStore {
    storage: Arc<dyn SessionStorage>,
    clock: Arc<dyn Clock>,
}

impl AuthStore {
    /// Create a store over the given storage and clock.
    #[must_use]
    pub fn new(storage: Arc<dyn SessionStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Create a store backed by process memory and the system clock.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), Arc::new(SystemClock))
    }

    /// The clock this store measures expiry against.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time in Unix milliseconds.
    #[must_use]
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Persist the session tokens, expiry and user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if any field cannot be written.
    pub fn save_session(&self, session: &Session, user: &AuthUser) -> Result<(), StorageError> {
        let user_json = serde_json::to_string(user)?;

        self.storage
            .set(ACCESS_TOKEN_KEY, session.access_token.expose_secret())?;
        self.storage
            .set(REFRESH_TOKEN_KEY, session.refresh_token.expose_secret())?;
        self.storage
            .set(TOKEN_EXPIRY_KEY, &session.expires_at.to_string())?;
        self.storage.set(USER_DATA_KEY, &user_json)?;
        Ok(())
    }

    /// Read the stored session and user.
    ///
    /// Returns `(None, None)` when a token or the expiry is missing, or when a
    /// stored value cannot be parsed. A session saved without a user yields
    /// `(Some(session), None)`.
    #[must_use]
    pub fn get_session(&self) -> (Option<Session>, Option<AuthUser>) {
        match self.read_session() {
            Ok(Some((session, user))) => (Some(session), user),
            Ok(None) => (None, None),
            Err(err) => {
                warn!(error = %err, "failed to read stored session");
                (None, None)
            }
        }
    }

    fn read_session(&self) -> Result<Option<(Session, Option<AuthUser>)>, StorageError> {
        let (Some(access_token), Some(refresh_token), Some(expires_at)) = (
            self.storage.get(ACCESS_TOKEN_KEY)?,
            self.storage.get(REFRESH_TOKEN_KEY)?,
            self.storage.get(TOKEN_EXPIRY_KEY)?,
        ) else {
            return Ok(None);
        };

        if access_token.is_empty() || refresh_token.is_empty() {
            return Ok(None);
        }

        let Ok(expires_at) = expires_at.trim().parse::<i64>() else {
            warn!("stored token expiry is not a number");
            return Ok(None);
        };

        let user = match self.storage.get(USER_DATA_KEY)? {
            Some(json) => match serde_json::from_str::<AuthUser>(&json) {
                Ok(user) => Some(user),
                Err(err) => {
                    warn!(error = %err, "stored user is malformed");
                    return Ok(None);
                }
            },
            None => None,
        };

        Ok(Some((Session::new(access_token, refresh_token, expires_at), user)))
    }

    /// Remove every persisted field. Safe to call when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if a field cannot be removed.
    pub fn clear_session(&self) -> Result<(), StorageError> {
        for key in ALL_KEYS {
            self.storage.remove(key)?;
        }
        Ok(())
    }

    /// True when there is no session or it expires within the safety buffer.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.get_session()
            .0
            .is_none_or(|session| session.is_expired_at(self.now_millis()))
    }

    /// True when a session and user are stored and the session is not expired.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        match self.get_session() {
            (Some(session), Some(_)) => !session.is_expired_at(self.now_millis()),
            _ => false,
        }
    }

    /// The stored user, if any.
    #[must_use]
    pub fn current_user(&self) -> Option<AuthUser> {
        self.get_session().1
    }

    /// Whether the user holds `role`. Admins satisfy every role.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.current_user().is_some_and(|user| user.has_role(role))
    }

    /// Whether the user holds `permission` explicitly or through their role.
    #[must_use]
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.current_user()
            .is_some_and(|user| user.has_permission(permission))
    }

    /// Role defaults plus explicit grants; empty when signed out.
    #[must_use]
    pub fn permissions(&self) -> BTreeSet<Permission> {
        self.current_user()
            .map(|user| user.effective_permissions())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use autopro_core::{EXPIRY_BUFFER_MS, ManualClock};

    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn store() -> (AuthStore, Arc<ManualClock>, Arc<MemoryStorage>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let storage = Arc::new(MemoryStorage::new());
        let store = AuthStore::new(storage.clone(), clock.clone());
        (store, clock, storage)
    }

    fn admin() -> AuthUser {
        AuthUser::new("1", "Administrator", Role::Admin)
    }

    #[test]
    fn test_save_then_get_round_trips() {
        let (store, _, _) = store();
        let session = Session::new("access", "refresh", NOW + 3_600_000);
        let user = AuthUser::new("42", "Olga", Role::Manager)
            .with_email("olga@example.com")
            .with_permission(Permission::ReadAnalytics);

        store.save_session(&session, &user).expect("save");

        let (loaded_session, loaded_user) = store.get_session();
        assert_eq!(loaded_session, Some(session));
        assert_eq!(loaded_user, Some(user));
    }

    #[test]
    fn test_clear_session() {
        let (store, _, _) = store();
        store
            .save_session(&Session::new("a", "r", NOW + 3_600_000), &admin())
            .expect("save");
        assert!(store.is_authenticated());

        store.clear_session().expect("clear");
        store.clear_session().expect("clear is idempotent");

        assert_eq!(store.get_session(), (None, None));
        assert!(!store.is_authenticated());
        assert!(store.is_expired());
    }

    #[test]
    fn test_is_expired_uses_buffer() {
        let (store, clock, _) = store();
        store
            .save_session(&Session::new("a", "r", NOW + EXPIRY_BUFFER_MS + 1), &admin())
            .expect("save");
        assert!(!store.is_expired());

        clock.set(NOW + 1);
        assert!(store.is_expired());
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_missing_token_yields_nothing() {
        let (store, _, storage) = store();
        store
            .save_session(&Session::new("a", "r", NOW + 3_600_000), &admin())
            .expect("save");

        storage.remove(REFRESH_TOKEN_KEY).expect("remove");
        assert_eq!(store.get_session(), (None, None));
    }

    #[test]
    fn test_unparsable_fields_yield_nothing() {
        let (store, _, storage) = store();
        store
            .save_session(&Session::new("a", "r", NOW + 3_600_000), &admin())
            .expect("save");

        storage.set(TOKEN_EXPIRY_KEY, "tomorrow").expect("set");
        assert_eq!(store.get_session(), (None, None));

        storage.set(TOKEN_EXPIRY_KEY, &(NOW + 3_600_000).to_string()).expect("set");
        storage.set(USER_DATA_KEY, "{not json").expect("set");
        assert_eq!(store.get_session(), (None, None));
    }

    #[test]
    fn test_session_without_user_is_not_authenticated() {
        let (store, _, storage) = store();
        store
            .save_session(&Session::new("a", "r", NOW + 3_600_000), &admin())
            .expect("save");
        storage.remove(USER_DATA_KEY).expect("remove");

        let (session, user) = store.get_session();
        assert!(session.is_some());
        assert!(user.is_none());
        assert!(!store.is_authenticated());
        assert!(!store.is_expired());
    }

    #[test]
    fn test_admin_has_every_permission() {
        let (store, _, _) = store();
        store
            .save_session(&Session::new("a", "r", NOW + 3_600_000), &admin())
            .expect("save");

        for permission in Permission::ALL {
            assert!(store.has_permission(permission));
        }
        assert!(store.has_role(Role::Manager));
        assert_eq!(store.permissions().len(), Permission::ALL.len());
    }

    #[test]
    fn test_role_and_explicit_permissions() {
        let (store, _, _) = store();
        let user = AuthUser::new("5", "Pavel", Role::User).with_permission(Permission::ManageOrders);
        store
            .save_session(&Session::new("a", "r", NOW + 3_600_000), &user)
            .expect("save");

        assert!(store.has_role(Role::User));
        assert!(!store.has_role(Role::Admin));
        assert!(store.has_permission(Permission::ManageOrders));
        assert!(store.has_permission(Permission::ReadCars));
        assert!(!store.has_permission(Permission::DeleteCars));
    }

    #[test]
    fn test_signed_out_checks() {
        let (store, _, _) = store();
        assert!(!store.has_role(Role::Guest));
        assert!(!store.has_permission(Permission::ReadCars));
        assert!(store.permissions().is_empty());
        assert!(store.current_user().is_none());
    }
}
