//! CLI argument definitions using clap
//!
//! Commands:
//! - aerobase serve --config <path> [--port <port>]
//! - aerobase check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Aerobase - an object API server with ACLs, sessions and hooks
#[derive(Parser, Debug)]
#[command(name = "aerobase")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./aerobase.json")]
        config: PathBuf,

        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Load and validate a configuration file, printing it with keys redacted
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./aerobase.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
