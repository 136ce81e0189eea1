//! HTTP JSON client for the AutoPro backend.

use std::sync::Arc;

use autopro_core::{AuthUser, Session};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::{ApiError, ApiErrorKind, ErrorBody};
use super::handlers::{ErrorHandlerRegistry, HandlerRegistration};
use crate::auth::AuthStore;

/// Login endpoint, relative to the base URL.
const LOGIN_PATH: &str = "/auth/login";
/// Token refresh endpoint, relative to the base URL.
const REFRESH_PATH: &str = "/auth/refresh";

/// Backend client.
///
/// Cheap to clone; clones share the HTTP connection pool, the auth store and
/// the error handler registry.
///
/// # Authentication
///
/// Unless a call opts out with `skip_auth`, the stored access token is sent as
/// `Authorization: Bearer`. An expired token is exchanged at `/auth/refresh`
/// first. If that fails the session is cleared and the request is sent without
/// credentials.
///
/// Refreshes are not serialized: concurrent requests that all see an expired
/// token each call `/auth/refresh`, and whichever response lands last is the
/// one persisted.
#[derive(Clone, Debug)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

#[derive(Debug)]
struct ApiClientInner {
    client: reqwest::Client,
    base_url: String,
    auth: AuthStore,
    handlers: Arc<ErrorHandlerRegistry>,
}

/// Request body for `/auth/login`.
#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Response from `/auth/login`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    /// Access token lifetime in seconds.
    expires_in: i64,
    user: AuthUser,
}

/// Request body for `/auth/refresh`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Response from `/auth/refresh`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

impl ApiClient {
    /// Create a client for the given base URL.
    #[must_use]
    pub fn new(base_url: &Url, auth: AuthStore) -> Self {
        Self::with_http_client(reqwest::Client::new(), base_url, auth)
    }

    /// Create a client reusing an existing HTTP client.
    #[must_use]
    pub fn with_http_client(client: reqwest::Client, base_url: &Url, auth: AuthStore) -> Self {
        Self {
            inner: Arc::new(ApiClientInner {
                client,
                base_url: base_url.as_str().trim_end_matches('/').to_string(),
                auth,
                handlers: ErrorHandlerRegistry::new(),
            }),
        }
    }

    /// The auth store this client reads tokens from.
    #[must_use]
    pub fn auth(&self) -> &AuthStore {
        &self.inner.auth
    }

    /// The error handler registry.
    #[must_use]
    pub fn handlers(&self) -> &Arc<ErrorHandlerRegistry> {
        &self.inner.handlers
    }

    /// Register a listener for errors of `kind`.
    ///
    /// The returned registration removes exactly this listener when
    /// `unregister` is called.
    pub fn register_error_handler<F>(&self, kind: ApiErrorKind, handler: F) -> HandlerRegistration
    where
        F: Fn(&ApiError) + Send + Sync + 'static,
    {
        self.inner.handlers.register(kind, Arc::new(handler))
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Send a request and decode the JSON response.
    ///
    /// `path` is appended to the base URL unless it is already absolute. The
    /// body is only sent for POST, PUT and PATCH. An empty success body
    /// decodes as JSON `null`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Network` if no response was received, or the variant
    /// matching the response status otherwise. A success body that does not
    /// decode into `T` is `ApiError::Unknown`. Every error is dispatched to the
    /// registered listeners before it is returned.
    #[instrument(skip(self, body), fields(method = %method))]
    pub async fn request<T, B>(
        &self,
        path: &str,
        method: Method,
        body: Option<&B>,
        skip_auth: bool,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.resolve_url(path);
        let token = if skip_auth {
            None
        } else {
            self.authorization().await
        };

        let mut request = self
            .inner
            .client
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, "application/json");

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        if let Some(body) = body
            && matches!(method, Method::POST | Method::PUT | Method::PATCH)
        {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Err(self.fail(ApiError::network(&e))),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return Err(self.fail(ApiError::network(&e))),
        };

        if !status.is_success() {
            // Best effort: a non-JSON error body leaves `details` empty
            let details = serde_json::from_str(&text).ok();
            return Err(self.fail(ApiError::from_response(status, details)));
        }

        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| {
            self.fail(ApiError::Unknown(
                ErrorBody::message(format!("failed to decode response: {e}")).with_status(status),
            ))
        })
    }

    /// GET `path`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request::<T, ()>(path, Method::GET, None, false).await
    }

    /// POST `body` to `path`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(path, Method::POST, Some(body), false).await
    }

    /// PUT `body` to `path`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(path, Method::PUT, Some(body), false).await
    }

    /// PATCH `body` to `path`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(path, Method::PATCH, Some(body), false).await
    }

    /// DELETE `path`.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request::<T, ()>(path, Method::DELETE, None, false).await
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Sign in and persist the resulting session.
    ///
    /// # Errors
    ///
    /// Returns the classified `ApiError` if the call fails, or
    /// `ApiError::Unknown` if the session cannot be persisted.
    #[instrument(skip(self, password), fields(username = %username))]
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<(Session, AuthUser), ApiError> {
        let response: LoginResponse = self
            .request(
                LOGIN_PATH,
                Method::POST,
                Some(&LoginRequest {
                    username,
                    password: password.expose_secret(),
                }),
                true,
            )
            .await?;

        let session = Session::from_expires_in(
            response.access_token,
            response.refresh_token,
            response.expires_in,
            self.inner.auth.now_millis(),
        );

        self.inner
            .auth
            .save_session(&session, &response.user)
            .map_err(|e| {
                ApiError::Unknown(ErrorBody::message(format!("failed to persist session: {e}")))
            })?;

        debug!(user_id = %response.user.id, role = %response.user.role, "signed in");
        Ok((session, response.user))
    }

    /// Drop the stored session.
    pub fn logout(&self) {
        self.clear_session();
    }

    /// Bearer token for an authenticated request, refreshing it if expired.
    async fn authorization(&self) -> Option<String> {
        let (session, user) = self.inner.auth.get_session();
        let session = session?;

        if !session.is_expired_at(self.inner.auth.now_millis()) {
            return Some(session.access_token.expose_secret().to_owned());
        }

        match self.refresh_session(&session, user.as_ref()).await {
            Ok(fresh) => Some(fresh.access_token.expose_secret().to_owned()),
            Err(err) => {
                warn!(error = %err, "token refresh failed, continuing without credentials");
                None
            }
        }
    }

    /// Exchange the refresh token for a new session.
    ///
    /// Any failure clears the stored session.
    #[instrument(skip_all)]
    async fn refresh_session(
        &self,
        session: &Session,
        user: Option<&AuthUser>,
    ) -> Result<Session, ApiError> {
        let result = self.send_refresh(session).await;

        match result {
            Ok(response) => {
                let fresh = Session::from_expires_in(
                    response.access_token,
                    response.refresh_token,
                    response.expires_in,
                    self.inner.auth.now_millis(),
                );

                if let Some(user) = user
                    && let Err(e) = self.inner.auth.save_session(&fresh, user)
                {
                    warn!(error = %e, "failed to persist refreshed session");
                }

                debug!("access token refreshed");
                Ok(fresh)
            }
            Err(err) => {
                self.clear_session();
                Err(err)
            }
        }
    }

    async fn send_refresh(&self, session: &Session) -> Result<RefreshResponse, ApiError> {
        let rejected = |status: Option<StatusCode>| {
            let body = ErrorBody::message("session refresh failed, please sign in again");
            ApiError::Auth(match status {
                Some(status) => body.with_status(status),
                None => body,
            })
        };

        let response = self
            .inner
            .client
            .post(self.resolve_url(REFRESH_PATH))
            .header(CONTENT_TYPE, "application/json")
            .json(&RefreshRequest {
                refresh_token: session.refresh_token.expose_secret(),
            })
            .send()
            .await
            .map_err(|e| {
                debug!(error = %e, "refresh request failed");
                rejected(None)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(rejected(Some(status)));
        }

        response.json::<RefreshResponse>().await.map_err(|e| {
            debug!(error = %e, "refresh response malformed");
            rejected(Some(status))
        })
    }

    /// Notify listeners, apply the 401 side effect and hand the error back.
    fn fail(&self, error: ApiError) -> ApiError {
        debug!(kind = %error.kind(), status = ?error.status(), error = %error, "request failed");
        self.inner.handlers.dispatch(&error);

        if error.is_unauthorized() {
            self.clear_session();
        }

        error
    }

    fn clear_session(&self) {
        if let Err(e) = self.inner.auth.clear_session() {
            warn!(error = %e, "failed to clear stored session");
        }
    }

    fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_owned()
        } else if path.starts_with('/') {
            format!("{}{path}", self.inner.base_url)
        } else {
            format!("{}/{path}", self.inner.base_url)
        }
    }
}
