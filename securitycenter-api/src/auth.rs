//! Two-step SecurityCenter login.
//!
//! 1. An unauthenticated `GET system` hands out an anonymous `TNS_SESSIONID` cookie.
//! 2. `POST token` with that cookie plus username/password returns the token under
//!    `response.token`.
//!
//! A session with both halves is persisted and reported as [`LoginOutcome::Authenticated`].
//! If the server accepts the cookie but issues no token, the caller gets
//! [`LoginOutcome::SessionOnly`] and nothing is stored.

use log::{debug, info, warn};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::SecurityCenterError;
use crate::client::{ApiExecutor, ApiRequest, SESSION_COOKIE, SYSTEM_PATH, TOKEN_PATH};
use crate::session::{Session, SessionStore};
use crate::tabular::value_to_string;

/// How far a login got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Cookie and token acquired and persisted
    Authenticated(Session),
    /// Cookie acquired but no token was issued; nothing was persisted
    SessionOnly(Session),
}

impl LoginOutcome {
    #[must_use]
    pub fn session(&self) -> &Session {
        match self {
            LoginOutcome::Authenticated(session) | LoginOutcome::SessionOnly(session) => session,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, LoginOutcome::Authenticated(_))
    }
}

/// Display fields of the logged-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub username: String,
}

/// Login, session check and logout for one host.
pub struct Authenticator<'a, E: ApiExecutor + ?Sized> {
    executor: &'a E,
    store: &'a SessionStore,
}

impl<'a, E: ApiExecutor + ?Sized> Authenticator<'a, E> {
    pub fn new(executor: &'a E, store: &'a SessionStore) -> Self {
        Self { executor, store }
    }

    /// Log in with `username` and `password`.
    ///
    /// # Errors
    ///
    /// Returns `Authentication` when no session cookie is handed out, and propagates
    /// transport, parse and storage errors.
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<LoginOutcome, SecurityCenterError> {
        let system = ApiRequest::get(SYSTEM_PATH).unauthenticated();
        let response = self.executor.execute(&system, None).await?;

        let session_id = extract_session_cookie(response.set_cookies())?.ok_or_else(|| {
            SecurityCenterError::Authentication("unable to acquire session".to_string())
        })?;
        debug!("Acquired anonymous session from {}", response.url);

        let mut credentials = Map::new();
        credentials.insert("username".to_string(), Value::from(username));
        credentials.insert(
            "password".to_string(),
            Value::from(password.expose_secret()),
        );

        let cookie_only = Session::cookie_only(session_id.clone());
        let exchange = ApiRequest::post(TOKEN_PATH, credentials);
        let response = self.executor.execute(&exchange, Some(&cookie_only)).await?;

        let token = value_to_string(&response.response()["token"]);
        if token.is_empty() {
            warn!(
                "⚠️  Login returned no token (HTTP {}): {}",
                response.status,
                response.error_msg().unwrap_or("no error message")
            );
            return Ok(LoginOutcome::SessionOnly(cookie_only));
        }

        let session = Session::new(session_id, token);
        self.store.set(&session)?;
        info!("✅ Logged in as {username}");
        Ok(LoginOutcome::Authenticated(session))
    }

    /// Check the stored session against `currentUser`.
    ///
    /// Transport and parse failures are reported as `Ok(None)` like any other rejection.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the session store cannot be read.
    pub async fn test(&self) -> Result<Option<UserProfile>, SecurityCenterError> {
        let session = self.store.get()?;
        let request = ApiRequest::get("currentUser").with_field("fields", "firstname,lastname,username");

        let response = match self.executor.execute(&request, session.as_ref()).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Session check failed: {e}");
                return Ok(None);
            }
        };

        if response.status != 200 || response.body.is_null() {
            debug!("Session check rejected with HTTP {}", response.status);
            return Ok(None);
        }

        Ok(serde_json::from_value::<UserProfile>(response.response().clone()).ok())
    }

    /// Forget the stored session locally.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the session store cannot be written.
    pub fn logout(&self) -> Result<(), SecurityCenterError> {
        self.store.delete()
    }
}

/// First non-empty session cookie value among `Set-Cookie` headers.
fn extract_session_cookie<'h>(
    set_cookies: impl Iterator<Item = &'h str>,
) -> Result<Option<String>, SecurityCenterError> {
    let pattern = match Regex::new(&format!("{SESSION_COOKIE}=([^;]*)")) {
        Ok(pattern) => pattern,
        Err(e) => {
            return Err(SecurityCenterError::InvalidConfig(format!(
                "invalid session cookie pattern: {e}"
            )));
        }
    };

    Ok(set_cookies
        .filter_map(|header| pattern.captures(header))
        .filter_map(|captures| captures.get(1))
        .map(|value| value.as_str().trim().to_string())
        .find(|value| !value.is_empty()))
}
