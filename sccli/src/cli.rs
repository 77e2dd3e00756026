//! CLI argument parsing for sccli
use clap::{Parser, Subcommand, ValueEnum};
use securitycenter_api::session::DEFAULT_DB_FILE;
use securitycenter_api::{DEFAULT_REQUEST_TIMEOUT_SECS, RecordType, ReportKind};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sccli",
    version,
    about = "Bulk export and import of Tenable SecurityCenter records",
    long_about = "Moves assets, users, groups, repositories, scans and reports between a SecurityCenter instance and CSV files",
    after_help = "EXAMPLES:
  # Log in once, the session is kept for 60 minutes
  sccli --host https://sc.example.org auth --username admin

  # Export every manageable asset
  sccli --host https://sc.example.org export asset --output assets.csv

  # Re-import, waiting 500ms between rows
  sccli --host https://sc.example.org --throttle 500 import asset --input assets.csv"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// SecurityCenter base URL
    #[arg(long, env = "SC_HOST", global = true, default_value = "")]
    pub host: String,

    /// API token; used instead of the stored session when given together with --session
    #[arg(long, env = "SC_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Session cookie value; used instead of the stored session when given together with --token
    #[arg(long, env = "SC_SESSION", global = true, hide_env_values = true)]
    pub session: Option<String>,

    /// Enable debug logging
    #[arg(long, short = 'd', global = true)]
    pub debug: bool,

    /// Milliseconds to wait between imported rows (non-positive disables)
    #[arg(
        long,
        global = true,
        default_value_t = -1,
        allow_negative_numbers = true
    )]
    pub throttle: i64,

    /// Session database file
    #[arg(long, env = "SC_SESSION_DB", global = true, default_value = DEFAULT_DB_FILE)]
    pub session_db: PathBuf,

    /// Per-call timeout in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS, value_parser = validate_timeout)]
    pub timeout: u64,

    /// Validate the server's TLS certificate
    #[arg(long, global = true)]
    pub verify_certificates: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in, unless the current session is still valid
    Auth {
        #[command(subcommand)]
        action: Option<AuthAction>,

        /// Login username
        #[arg(long, short = 'u', env = "SC_USERNAME")]
        username: Option<String>,

        /// Login password
        #[arg(long, short = 'p', env = "SC_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Check whether the current session is valid
    Test,

    /// Export a record type, or any listing endpoint, as CSV
    Export {
        /// Record type (asset, user, group, repository, scan, reportDefinition, report) or endpoint
        #[arg(value_parser = validate_target)]
        target: String,

        /// Comma separated dotted-path columns, e.g. name,groups.name
        #[arg(long, short = 'f', value_parser = validate_fields)]
        fields: Option<String>,

        /// Listing filter, e.g. manageable or usable
        #[arg(long)]
        filter: Option<String>,

        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Import records from a CSV file
    Import {
        /// Record type (asset, user, group, scan)
        #[arg(value_parser = validate_import_type)]
        record_type: RecordType,

        /// CSV file with a header row
        #[arg(long, short = 'i', value_parser = validate_input_file)]
        input: PathBuf,

        /// Resolve and validate every row but send nothing
        #[arg(long, alias = "dry-run")]
        dryrun: bool,
    },

    /// Download report files into a directory
    Reports {
        /// Which reports to download
        #[arg(value_enum)]
        kind: ReportSelection,

        /// Existing directory to save the files in
        #[arg(long, value_parser = validate_directory)]
        dir: PathBuf,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    /// Forget the stored session
    Delete,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSelection {
    /// Report definitions (report tasks)
    Definitions,
    /// Generated report results
    Results,
}

impl From<ReportSelection> for ReportKind {
    fn from(selection: ReportSelection) -> Self {
        match selection {
            ReportSelection::Definitions => ReportKind::Definitions,
            ReportSelection::Results => ReportKind::Results,
        }
    }
}

/// Validate an export target: a record type or a bare endpoint name
fn validate_target(s: &str) -> Result<String, String> {
    let trimmed = s.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err("Export target cannot be empty".to_string());
    }
    if trimmed.contains(char::is_whitespace) {
        return Err(format!("'{s}' is not a valid endpoint name"));
    }
    Ok(trimmed.to_string())
}

/// Validate a field selector (comma separated, no empty segments)
fn validate_fields(s: &str) -> Result<String, String> {
    let segments: Vec<&str> = s.split(',').map(str::trim).collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(format!("'{s}' contains an empty column"));
    }
    if segments
        .iter()
        .any(|segment| segment.split('.').any(str::is_empty))
    {
        return Err(format!("'{s}' contains an empty path segment"));
    }
    Ok(segments.join(","))
}

/// Validate a record type that supports import
fn validate_import_type(s: &str) -> Result<RecordType, String> {
    let record_type: RecordType = s.parse()?;
    if !record_type.supports_import() {
        return Err(format!("{record_type} records cannot be imported"));
    }
    Ok(record_type)
}

/// Validate that the input file exists
fn validate_input_file(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if !path.is_file() {
        return Err(format!("File '{s}' does not exist"));
    }
    Ok(path)
}

/// Validate that the output directory exists
fn validate_directory(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if !path.is_dir() {
        return Err(format!("The directory \"{s}\" does not exist"));
    }
    Ok(path)
}

/// Validate the per-call timeout (> 0)
fn validate_timeout(s: &str) -> Result<u64, String> {
    let value: u64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value == 0 {
        return Err("Timeout must be greater than 0".to_string());
    }
    Ok(value)
}
