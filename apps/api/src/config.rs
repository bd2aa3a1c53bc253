//! # API Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MERIDIAN_BIND_ADDR=0.0.0.0:8080                                    │
//! │     MERIDIAN_DATABASE_PATH=/var/lib/meridian/ledger.db                 │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     --config <path>, otherwise                                         │
//! │     ~/.config/meridian/meridian.toml (Linux)                           │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # meridian.toml
//! [server]
//! bind_addr = "127.0.0.1:8080"
//! allow_anonymous = false   # true: requests without X-User-Id act as admin
//!
//! [database]
//! path = "meridian.db"
//! max_connections = 5
//! operation_timeout_secs = 10
//! location_cache_ttl_secs = 300
//! ```

use meridian_db::DbConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Server Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Run requests without `X-User-Id` as the system user. Off unless set;
    /// meant for single-till installs and maintenance.
    #[serde(default)]
    pub allow_anonymous: bool,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
            allow_anonymous: false,
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    #[serde(default = "default_cache_ttl")]
    pub location_cache_ttl_secs: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("meridian.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_operation_timeout() -> u64 {
    10
}

fn default_cache_ttl() -> u64 {
    300
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
            operation_timeout_secs: default_operation_timeout(),
            location_cache_ttl_secs: default_cache_ttl(),
        }
    }
}

// =============================================================================
// API Config
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl ApiConfig {
    /// Loads configuration: defaults, then the TOML file, then environment.
    ///
    /// An explicit `config_path` that does not exist is an error; a missing
    /// file at the default location is not.
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        let explicit = config_path.is_some();
        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else if explicit {
                return Err(ConfigError::Invalid(format!(
                    "config file not found: {}",
                    path.display()
                )));
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.bind_addr()?;

        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database.path must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.database.operation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "database.operation_timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> ConfigResult<SocketAddr> {
        self.server.bind_addr.parse().map_err(|_| {
            ConfigError::Invalid(format!("bad bind address: '{}'", self.server.bind_addr))
        })
    }

    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database.path.clone())
            .max_connections(self.database.max_connections)
            .operation_timeout(Duration::from_secs(self.database.operation_timeout_secs))
            .location_cache_ttl(Duration::from_secs(self.database.location_cache_ttl_secs))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from any variable source; unparsable numbers are
    /// logged and ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = var("MERIDIAN_BIND_ADDR") {
            debug!(addr = %addr, "Overriding bind address from environment");
            self.server.bind_addr = addr;
        }

        if let Some(raw) = var("MERIDIAN_ALLOW_ANONYMOUS") {
            match raw.parse() {
                Ok(allow) => self.server.allow_anonymous = allow,
                Err(_) => warn!(value = %raw, "Ignoring MERIDIAN_ALLOW_ANONYMOUS"),
            }
        }

        if let Some(path) = var("MERIDIAN_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(raw) = var("MERIDIAN_DB_MAX_CONNECTIONS") {
            match raw.parse() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %raw, "Ignoring MERIDIAN_DB_MAX_CONNECTIONS"),
            }
        }

        if let Some(raw) = var("MERIDIAN_DB_TIMEOUT_SECS") {
            match raw.parse() {
                Ok(n) => self.database.operation_timeout_secs = n,
                Err(_) => warn!(value = %raw, "Ignoring MERIDIAN_DB_TIMEOUT_SECS"),
            }
        }

        if let Some(raw) = var("MERIDIAN_LOCATION_CACHE_TTL_SECS") {
            match raw.parse() {
                Ok(n) => self.database.location_cache_ttl_secs = n,
                Err(_) => warn!(value = %raw, "Ignoring MERIDIAN_LOCATION_CACHE_TTL_SECS"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "meridian", "ledger")
            .map(|dirs| dirs.config_dir().join("meridian.toml"))
    }
}
