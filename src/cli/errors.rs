//! CLI-specific error types

use thiserror::Error;

use crate::config::ConfigError;

/// CLI error
#[derive(Debug, Error)]
pub enum CliError {
    #[error("AERO_CLI_CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),

    #[error("AERO_CLI_IO_ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("AERO_CLI_IO_ERROR: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("AERO_CLI_BOOT_FAILED: {0}")]
    BootFailed(String),
}

impl CliError {
    /// Boot failed
    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::BootFailed(msg.into())
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        match self {
            Self::Config(_) => "AERO_CLI_CONFIG_ERROR",
            Self::Io(_) | Self::Json(_) => "AERO_CLI_IO_ERROR",
            Self::BootFailed(_) => "AERO_CLI_BOOT_FAILED",
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
