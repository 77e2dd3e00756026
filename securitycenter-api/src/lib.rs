//! # SecurityCenter API Client Library
//!
//! A Rust client library for the Tenable SecurityCenter REST API, focused on moving
//! records (assets, users, groups, repositories, scans, reports) between the remote
//! service and flat CSV files.
//!
//! ## Features
//!
//! - 🔐 **Session Authentication** - Two-step cookie + token login with a local, host-scoped session store
//! - 🔄 **Explicit Auth Injection** - Every request declares whether it carries credentials
//! - 📤 **Bulk Export** - Nested JSON records flattened into dotted-path CSV columns
//! - 📥 **Bulk Import** - CSV rows expanded back into API records, with name→id resolution
//! - 🚦 **Throttling** - Optional fixed delay between per-row submissions
//! - 🛑 **Fail-Fast** - Imports stop at the first row the server rejects
//!
//! ## Quick Start
//!
//! ```no_run
//! use securitycenter_api::{
//!     BulkDriver, NoThrottle, RecordType, SecurityCenterClient, SecurityCenterConfig, SessionStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SecurityCenterConfig::new("https://sc.example.org");
//!     let client = SecurityCenterClient::new(config.clone())?;
//!
//!     let store = SessionStore::new("auth.db", &config.host);
//!     let session = store.get()?.ok_or("no session, run `sccli auth` first")?;
//!
//!     let mut driver = BulkDriver::new(&client, session, NoThrottle);
//!     let export = driver.export(RecordType::Asset, None, None).await?;
//!     println!("exported {} assets", export.rows.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Credential Precedence
//!
//! Explicit token/session overrides (for example from `SC_TOKEN` and `SC_SESSION`) are
//! always preferred. Otherwise the session persisted by the last successful login for the
//! same host is used, as long as it is younger than [`session::SESSION_TTL_MINUTES`].

pub mod auth;
pub mod bulk;
pub mod client;
pub mod lookup;
pub mod record;
pub mod rules;
pub mod session;
pub mod tabular;
pub mod throttle;

use std::fmt;
use std::time::Duration;

use reqwest::Error as ReqwestError;

// Re-export common types for convenience
pub use auth::{Authenticator, LoginOutcome, UserProfile};
pub use bulk::{BulkDriver, ExportOutcome, ImportFailure, ImportSummary, ReportDownloadSummary};
pub use client::{ApiExecutor, ApiRequest, ApiResponse, HttpMethod, RawResponse, SecurityCenterClient};
pub use lookup::{LookupKind, LookupTable, LookupTables};
pub use record::{ExportColumn, Extract, RecordType, ReportKind};
pub use rules::{Expanded, RowError, Submission, WriteMode};
pub use session::{Session, SessionOverride, SessionStore};
pub use tabular::FlatRow;
pub use throttle::{IntervalThrottle, NoThrottle, Throttle};

/// Default REST prefix every endpoint path is joined onto.
pub const DEFAULT_API_PREFIX: &str = "/rest/";

/// Upper bound for a single HTTP call, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 90;

/// Custom error type for SecurityCenter API operations.
///
/// Lower layers always hand one of these back to the caller; only the bulk driver
/// decides whether a multi-row run stops.
#[derive(Debug)]
pub enum SecurityCenterError {
    /// HTTP request failed (connection refused, TLS failure, ...)
    Http(ReqwestError),
    /// HTTP request exceeded the configured per-call timeout
    Timeout(String),
    /// JSON serialization/deserialization failed, including unparsable response bodies
    Serialization(serde_json::Error),
    /// Session could not be acquired or no usable credentials are available
    Authentication(String),
    /// API returned something other than what the operation needs
    InvalidResponse(String),
    /// Configuration is invalid (missing host, bad URL, ...)
    InvalidConfig(String),
    /// When an item is not found
    NotFound(String),
    /// Local session database failure
    Storage(rusqlite::Error),
    /// CSV reading or writing failed
    Csv(csv::Error),
    /// File system error
    Io(std::io::Error),
    /// Operation is not available for the requested record type
    Unsupported(String),
}

impl fmt::Display for SecurityCenterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SecurityCenterError::Http(e) => write!(f, "HTTP error: {e}"),
            SecurityCenterError::Timeout(e) => write!(f, "Request timed out: {e}"),
            SecurityCenterError::Serialization(e) => write!(f, "Serialization error: {e}"),
            SecurityCenterError::Authentication(e) => write!(f, "Authentication error: {e}"),
            SecurityCenterError::InvalidResponse(e) => write!(f, "Invalid response: {e}"),
            SecurityCenterError::InvalidConfig(e) => write!(f, "Invalid configuration: {e}"),
            SecurityCenterError::NotFound(e) => write!(f, "Item not found: {e}"),
            SecurityCenterError::Storage(e) => write!(f, "Session storage error: {e}"),
            SecurityCenterError::Csv(e) => write!(f, "CSV error: {e}"),
            SecurityCenterError::Io(e) => write!(f, "File system error: {e}"),
            SecurityCenterError::Unsupported(e) => write!(f, "Unsupported operation: {e}"),
        }
    }
}

impl std::error::Error for SecurityCenterError {}

impl From<ReqwestError> for SecurityCenterError {
    fn from(error: ReqwestError) -> Self {
        if error.is_timeout() {
            SecurityCenterError::Timeout(error.to_string())
        } else {
            SecurityCenterError::Http(error)
        }
    }
}

impl From<serde_json::Error> for SecurityCenterError {
    fn from(error: serde_json::Error) -> Self {
        SecurityCenterError::Serialization(error)
    }
}

impl From<rusqlite::Error> for SecurityCenterError {
    fn from(error: rusqlite::Error) -> Self {
        SecurityCenterError::Storage(error)
    }
}

impl From<csv::Error> for SecurityCenterError {
    fn from(error: csv::Error) -> Self {
        SecurityCenterError::Csv(error)
    }
}

impl From<std::io::Error> for SecurityCenterError {
    fn from(error: std::io::Error) -> Self {
        SecurityCenterError::Io(error)
    }
}

/// Configuration for the SecurityCenter API client.
///
/// SecurityCenter is usually deployed on-prem behind a self-signed certificate, so
/// certificate validation is off unless explicitly enabled.
#[derive(Debug, Clone)]
pub struct SecurityCenterConfig {
    /// Base URL of the SecurityCenter instance (e.g. `https://sc.example.org`)
    pub host: String,
    /// Path prefix joined between host and endpoint
    pub api_prefix: String,
    /// Per-call timeout in seconds
    pub request_timeout: u64,
    /// Whether to validate TLS certificates (default: false)
    pub validate_certificates: bool,
    /// Explicit credentials that take precedence over the session store
    pub session_override: Option<SessionOverride>,
}

impl SecurityCenterConfig {
    /// Create a new configuration for the given host with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
            validate_certificates: false,
            session_override: None,
        }
    }

    /// Override the per-call timeout.
    pub fn with_request_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout = seconds;
        self
    }

    /// Turn TLS certificate validation on.
    pub fn with_certificate_validation(mut self) -> Self {
        self.validate_certificates = true;
        self
    }

    /// Supply explicit token/session credentials.
    pub fn with_session_override(mut self, session_override: SessionOverride) -> Self {
        self.session_override = Some(session_override);
        self
    }

    /// Per-call timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Validate the configuration before any network call is made.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the host is empty or not an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), SecurityCenterError> {
        if self.host.trim().is_empty() {
            return Err(SecurityCenterError::InvalidConfig(
                "\"--host\" flag not set".to_string(),
            ));
        }

        let parsed = url::Url::parse(&self.host).map_err(|e| {
            SecurityCenterError::InvalidConfig(format!("Invalid host URL '{}': {e}", self.host))
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SecurityCenterError::InvalidConfig(format!(
                "Host must use http or https, got '{}'",
                parsed.scheme()
            )));
        }

        Ok(())
    }
}
