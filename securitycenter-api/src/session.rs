//! Host-scoped persistence of the SecurityCenter session credentials.
//!
//! A session is the pair (`TNS_SESSIONID` cookie value, `X-SecurityCenter` token) handed out
//! by a successful login. It is kept in a small SQLite file as key/value rows under a bucket
//! named after the remote host, together with a `__timestamp` written at save time. Sessions
//! self-destruct after [`SESSION_TTL_MINUTES`]: the first read after expiry removes them.
//!
//! The database is opened per operation; nothing holds a connection between calls.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::SecurityCenterError;

/// Prefix of the bucket that holds one host's session.
pub const BUCKET_NAME: &str = "AuthBucket";

/// Default database file, relative to the working directory.
pub const DEFAULT_DB_FILE: &str = "auth.db";

/// Lifetime of a persisted session.
pub const SESSION_TTL_MINUTES: i64 = 60;

const KEY_SESSION: &str = "session";
const KEY_TOKEN: &str = "token";
const KEY_TIMESTAMP: &str = "__timestamp";

/// Session credentials for one SecurityCenter host.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Value of the `TNS_SESSIONID` cookie
    pub session_id: String,
    /// Value sent in the `X-SecurityCenter` header; empty when only the cookie is known
    pub token: String,
    /// When the credentials were obtained or written
    pub acquired_at: DateTime<Utc>,
}

impl Session {
    /// Create a session acquired now.
    pub fn new(session_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            token: token.into(),
            acquired_at: Utc::now(),
        }
    }

    /// A session that carries only the cookie, as held between the two login steps.
    pub fn cookie_only(session_id: impl Into<String>) -> Self {
        Self::new(session_id, String::new())
    }

    #[must_use]
    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    /// Whether the session is past its TTL at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.acquired_at) >= Duration::minutes(SESSION_TTL_MINUTES)
    }

    /// When the session stops being usable.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at + Duration::minutes(SESSION_TTL_MINUTES)
    }
}

/// Custom Debug implementation for `Session` that redacts the credentials
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &"[REDACTED]")
            .field("token", &self.has_token().then_some("[REDACTED]"))
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

/// Explicit credentials supplied at runtime (flags or environment).
#[derive(Clone)]
pub struct SessionOverride {
    pub session_id: String,
    pub token: String,
}

impl SessionOverride {
    pub fn new(session_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            token: token.into(),
        }
    }

    /// Build an override only when both halves are present and non-empty.
    #[must_use]
    pub fn from_parts(session_id: Option<&str>, token: Option<&str>) -> Option<Self> {
        match (session_id, token) {
            (Some(session_id), Some(token)) if !session_id.is_empty() && !token.is_empty() => {
                Some(Self::new(session_id, token))
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for SessionOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionOverride([REDACTED])")
    }
}

/// Session store scoped to one remote host.
#[derive(Debug, Clone)]
pub struct SessionStore {
    db_path: PathBuf,
    host: String,
    session_override: Option<SessionOverride>,
}

impl SessionStore {
    /// Create a store backed by the database file at `db_path` for `host`.
    pub fn new(db_path: impl AsRef<Path>, host: &str) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            host: host.to_string(),
            session_override: None,
        }
    }

    /// Prefer the given explicit credentials over anything persisted.
    #[must_use]
    pub fn with_override(mut self, session_override: Option<SessionOverride>) -> Self {
        self.session_override = session_override;
        self
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn bucket(&self) -> String {
        format!("{BUCKET_NAME}|{}", self.host)
    }

    fn connect(&self) -> Result<Connection, SecurityCenterError> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_bucket (
                bucket TEXT NOT NULL,
                key    TEXT NOT NULL,
                value  TEXT NOT NULL,
                PRIMARY KEY (bucket, key)
            )",
            [],
        )?;
        Ok(conn)
    }

    /// Current session, if any.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the database cannot be opened or read.
    pub fn get(&self) -> Result<Option<Session>, SecurityCenterError> {
        self.get_at(Utc::now())
    }

    /// Same as [`SessionStore::get`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the database cannot be opened or read.
    pub fn get_at(&self, now: DateTime<Utc>) -> Result<Option<Session>, SecurityCenterError> {
        if let Some(session_override) = &self.session_override {
            debug!("Using session credentials supplied at runtime");
            return Ok(Some(Session {
                session_id: session_override.session_id.clone(),
                token: session_override.token.clone(),
                acquired_at: now,
            }));
        }

        let conn = self.connect()?;
        let bucket = self.bucket();
        let mut data = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT key, value FROM auth_bucket WHERE bucket = ?1")?;
            let rows = stmt.query_map(params![bucket], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (key, value) = row?;
                data.insert(key, value);
            }
        }

        if data.is_empty() {
            return Ok(None);
        }

        let Some(session) = session_from_fields(&data) else {
            debug!("Stored session for {} is incomplete, ignoring it", self.host);
            return Ok(None);
        };

        if session.is_expired_at(now) {
            clear_bucket(&conn, &bucket)?;
            info!("Your session has expired.");
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Persist `session`, replacing whatever was stored for this host.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the database cannot be opened or written.
    pub fn set(&self, session: &Session) -> Result<(), SecurityCenterError> {
        self.set_at(session, Utc::now())
    }

    /// Same as [`SessionStore::set`] with an explicit write time.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the database cannot be opened or written.
    pub fn set_at(&self, session: &Session, now: DateTime<Utc>) -> Result<(), SecurityCenterError> {
        let mut conn = self.connect()?;
        let bucket = self.bucket();
        let timestamp = now.timestamp().to_string();

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM auth_bucket WHERE bucket = ?1", params![bucket])?;
        for (key, value) in [
            (KEY_SESSION, session.session_id.as_str()),
            (KEY_TOKEN, session.token.as_str()),
            (KEY_TIMESTAMP, timestamp.as_str()),
        ] {
            tx.execute(
                "INSERT INTO auth_bucket (bucket, key, value) VALUES (?1, ?2, ?3)",
                params![bucket, key, value],
            )?;
        }
        tx.commit()?;

        debug!("Stored session for {} in {}", self.host, self.db_path.display());
        Ok(())
    }

    /// Forget the stored session for this host. The server-side session stays valid.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the database cannot be opened or written.
    pub fn delete(&self) -> Result<(), SecurityCenterError> {
        let conn = self.connect()?;
        clear_bucket(&conn, &self.bucket())
    }
}

fn clear_bucket(conn: &Connection, bucket: &str) -> Result<(), SecurityCenterError> {
    conn.execute("DELETE FROM auth_bucket WHERE bucket = ?1", params![bucket])?;
    Ok(())
}

fn session_from_fields(data: &HashMap<String, String>) -> Option<Session> {
    let session_id = data.get(KEY_SESSION)?;
    let token = data.get(KEY_TOKEN)?;
    let seconds = data.get(KEY_TIMESTAMP)?.parse::<i64>().ok()?;
    let acquired_at = DateTime::from_timestamp(seconds, 0)?;

    if session_id.is_empty() || token.is_empty() {
        return None;
    }

    Some(Session {
        session_id: session_id.clone(),
        token: token.clone(),
        acquired_at,
    })
}
