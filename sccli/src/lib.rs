//! sccli library - command line front end for the SecurityCenter client
//!
//! Argument parsing, logging setup and command dispatch. All SecurityCenter behaviour lives
//! in `securitycenter-api`.
pub mod cli;
pub mod commands;
pub mod error;

// Re-export commonly used types
pub use cli::{Cli, Commands};
pub use commands::run;
pub use error::{CliError, Result};
