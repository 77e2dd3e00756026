//! Error types for sccli
use securitycenter_api::SecurityCenterError;

/// Custom error type for sccli commands
#[derive(thiserror::Error, Debug)]
pub enum CliError {
    /// SecurityCenter API or local store error
    #[error("SecurityCenter error: {0}")]
    Api(#[from] SecurityCenterError),

    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Login needs credentials that were not supplied
    #[error("Missing required credentials: {0}")]
    MissingCredentials(String),

    /// No usable session for a command that needs one
    #[error("Not logged in: {0}")]
    NotLoggedIn(String),

    /// An import stopped before every row was accepted
    #[error("Import stopped at row {row}: {payload}")]
    ImportFailed { row: usize, payload: String },
}

/// Result type alias for sccli operations
pub type Result<T> = std::result::Result<T, CliError>;
