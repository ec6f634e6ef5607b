//! CLI command implementations

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;
use crate::config::AppConfig;
use crate::http::HttpServer;
use crate::rest::RestService;
use crate::store::MemoryStore;

/// Main entry point for CLI
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config, port } => serve(&config, port),
        Command::CheckConfig { config } => check_config(&config),
    }
}

/// Install the JSON log subscriber, filtered by `RUST_LOG` (default `info`)
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed when embedded
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init();
}

/// Start the object API over an in-memory store
pub fn serve(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    let mut config = AppConfig::load(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    init_tracing();

    let rest = RestService::new(config, Arc::new(MemoryStore::new()));
    let server = HttpServer::new(rest);
    info!(addr = %server.socket_addr(), "starting aerobase");

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        server
            .start()
            .await
            .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))
    })?;

    Ok(())
}

/// Validate a configuration file and print it with keys redacted
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = AppConfig::load(config_path)?;
    write_response(serde_json::to_value(config.redacted())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_check_config_accepts_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"app_id": "app", "master_key": "m", "client_key": "c"}}"#
        )
        .unwrap();
        check_config(file.path()).unwrap();
    }

    #[test]
    fn test_check_config_rejects_missing_key() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"app_id": "app"}}"#).unwrap();
        let err = check_config(file.path()).unwrap_err();
        assert_eq!(err.code_str(), "AERO_CLI_CONFIG_ERROR");
    }
}
