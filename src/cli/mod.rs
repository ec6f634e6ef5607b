//! CLI module for Aerobase
//!
//! Provides command-line interface for:
//! - serve: Start the HTTP object API
//! - check-config: Validate a configuration file

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{check_config, run, run_command, serve};
pub use errors::{CliError, CliResult};
pub use io::{write_error, write_response};
