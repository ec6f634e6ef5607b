//! # Application Configuration
//!
//! Loaded once from a JSON file, validated, and injected as `Arc<AppConfig>`
//! into every component that needs it. Only the three keys are required.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1337
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Failed-login lockout policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutConfig {
    /// Failed attempts before locking; zero or negative disables lockout
    #[serde(default)]
    pub threshold: i64,

    #[serde(default = "default_lockout_minutes")]
    pub duration_minutes: i64,
}

fn default_lockout_minutes() -> i64 {
    5
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            threshold: 0,
            duration_minutes: default_lockout_minutes(),
        }
    }
}

impl LockoutConfig {
    pub fn enabled(&self) -> bool {
        self.threshold > 0
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub app_id: String,
    pub master_key: String,
    pub client_key: String,

    /// Public base URL used in `Location` headers
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub account_lockout: LockoutConfig,

    #[serde(default = "default_session_length")]
    pub session_length_secs: u64,

    #[serde(default = "default_session_cache_ttl")]
    pub session_cache_ttl_secs: u64,

    #[serde(default = "default_timeout_ms")]
    pub store_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub hook_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub auth_data_timeout_ms: u64,

    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_max_include_depth")]
    pub max_include_depth: usize,

    #[serde(default = "default_true")]
    pub allow_client_class_creation: bool,
}

fn default_server_url() -> String {
    "http://localhost:1337".to_string()
}

fn default_session_length() -> u64 {
    365 * 24 * 60 * 60
}

fn default_session_cache_ttl() -> u64 {
    5
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_limit() -> usize {
    100
}

fn default_max_include_depth() -> usize {
    3
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Configuration with every optional field at its default
    pub fn new(
        app_id: impl Into<String>,
        master_key: impl Into<String>,
        client_key: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            master_key: master_key.into(),
            client_key: client_key.into(),
            server_url: default_server_url(),
            server: ServerConfig::default(),
            account_lockout: LockoutConfig::default(),
            session_length_secs: default_session_length(),
            session_cache_ttl_secs: default_session_cache_ttl(),
            store_timeout_ms: default_timeout_ms(),
            hook_timeout_ms: default_timeout_ms(),
            auth_data_timeout_ms: default_timeout_ms(),
            default_limit: default_limit(),
            max_include_depth: default_max_include_depth(),
            allow_client_class_creation: true,
        }
    }

    pub fn with_lockout(mut self, threshold: i64, duration_minutes: i64) -> Self {
        self.account_lockout = LockoutConfig {
            threshold,
            duration_minutes,
        };
        self
    }

    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (name, value) in [
            ("app_id", &self.app_id),
            ("master_key", &self.master_key),
            ("client_key", &self.client_key),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", name)));
            }
        }

        if self.account_lockout.enabled()
            && !(1..=99999).contains(&self.account_lockout.duration_minutes)
        {
            return Err(ConfigError::Invalid(
                "account_lockout.duration_minutes must be between 1 and 99999".to_string(),
            ));
        }

        for (name, value) in [
            ("store_timeout_ms", self.store_timeout_ms),
            ("hook_timeout_ms", self.hook_timeout_ms),
            ("auth_data_timeout_ms", self.auth_data_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }

        if self.default_limit == 0 {
            return Err(ConfigError::Invalid("default_limit must be > 0".to_string()));
        }

        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }

    pub fn auth_data_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_data_timeout_ms)
    }

    pub fn session_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.session_cache_ttl_secs)
    }

    pub fn session_length(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_length_secs.min(i64::MAX as u64) as i64)
    }

    /// Copy with every key replaced by a placeholder, for printing
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.master_key = "<redacted>".to_string();
        copy.client_key = "<redacted>".to_string();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_applied() {
        let config: AppConfig = serde_json::from_str(
            r#"{"app_id": "app", "master_key": "master", "client_key": "client"}"#,
        )
        .unwrap();
        assert_eq!(config.default_limit, 100);
        assert_eq!(config.max_include_depth, 3);
        assert!(config.allow_client_class_creation);
        assert!(!config.account_lockout.enabled());
        assert_eq!(config.server.socket_addr(), "0.0.0.0:1337");
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_key_rejected() {
        let result: Result<AppConfig, _> =
            serde_json::from_str(r#"{"app_id": "app", "master_key": "master"}"#);
        assert!(result.is_err());

        let config = AppConfig::new("app", "", "client");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_lockout_duration_bounds() {
        assert!(AppConfig::new("a", "m", "c")
            .with_lockout(3, 0)
            .validate()
            .is_err());
        assert!(AppConfig::new("a", "m", "c")
            .with_lockout(3, 100000)
            .validate()
            .is_err());
        assert!(AppConfig::new("a", "m", "c")
            .with_lockout(3, 5)
            .validate()
            .is_ok());
        // Duration is irrelevant while lockout is disabled
        assert!(AppConfig::new("a", "m", "c")
            .with_lockout(0, 0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"app_id": "app", "master_key": "m", "client_key": "c",
                "account_lockout": {{"threshold": 3, "duration_minutes": 5}},
                "server": {{"port": 8080}}}}"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.account_lockout.threshold, 3);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/aerobase.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_redacted() {
        let config = AppConfig::new("app", "secret", "client").redacted();
        assert_eq!(config.master_key, "<redacted>");
        assert_eq!(config.app_id, "app");
    }
}
