//! Configuration for docbridge
//!
//! Centralized configuration with sensible defaults. Values normally come from
//! the environment (`Config::from_env`) or the builder; `validate()` is the
//! single gate that turns a bad shape into a `Configuration` error.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Environment variable names read by `Config::from_env`
pub const ENV_PROJECT_ID: &str = "DOCBRIDGE_PROJECT_ID";
pub const ENV_CREDENTIALS_PATH: &str = "DOCBRIDGE_CREDENTIALS_PATH";
pub const ENV_ENDPOINT: &str = "DOCBRIDGE_ENDPOINT";
pub const ENV_LISTEN_ADDR: &str = "DOCBRIDGE_LISTEN_ADDR";

/// Main configuration for a docbridge client (and the development server)
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------
    /// Project the store is scoped to; checked during the handshake
    pub project_id: String,

    /// File holding the access token presented during the handshake
    pub credentials_path: PathBuf,

    /// Named collections for the logical domains the application uses
    pub collections: Collections,

    // -------------------------------------------------------------------------
    // Access Layer Limits
    // -------------------------------------------------------------------------
    /// Max operations buffered in one batch
    pub max_batch_size: usize,

    /// Max attempts per read, including the first
    pub max_retry_attempts: u32,

    /// Limit applied to queries that don't set one
    pub default_query_limit: usize,

    /// Backoff grows as `backoff_unit * backoff_base^attempt`
    pub backoff_base: u32,
    pub backoff_unit: Duration,

    /// Worker threads for `Client::spawn_*` reads
    pub read_workers: usize,

    // -------------------------------------------------------------------------
    // Transport Configuration
    // -------------------------------------------------------------------------
    /// Remote store address (host:port)
    pub endpoint: String,

    /// TCP connect timeout (milliseconds)
    pub connect_timeout_ms: u64,

    /// Socket read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Socket write timeout (milliseconds)
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Server Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address for the development server
    pub listen_addr: String,

    /// Max concurrent client connections accepted by the server
    pub max_connections: usize,
}

/// Collection names for the three logical domains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collections {
    pub modules: String,
    pub compatibility: String,
    pub integrations: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            modules: "modules".to_string(),
            compatibility: "compatibility_assessments".to_string(),
            integrations: "integrated_systems".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: "docbridge-default".to_string(),
            credentials_path: PathBuf::from("./service-account-key.json"),
            collections: Collections::default(),
            max_batch_size: 500,
            max_retry_attempts: 3,
            default_query_limit: 100,
            backoff_base: 2,
            backoff_unit: Duration::from_secs(1),
            read_workers: 4,
            endpoint: "127.0.0.1:7450".to_string(),
            connect_timeout_ms: 5000,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            listen_addr: "127.0.0.1:7450".to_string(),
            max_connections: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Defaults overridden by any `DOCBRIDGE_*` variables that are set
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(project_id) = std::env::var(ENV_PROJECT_ID) {
            config.project_id = project_id;
        }
        if let Ok(path) = std::env::var(ENV_CREDENTIALS_PATH) {
            config.credentials_path = PathBuf::from(path);
        }
        if let Ok(endpoint) = std::env::var(ENV_ENDPOINT) {
            config.endpoint = endpoint;
        }
        if let Ok(addr) = std::env::var(ENV_LISTEN_ADDR) {
            config.listen_addr = addr;
        }

        config
    }

    /// Check the config is usable
    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(BridgeError::Configuration(format!(
                "{} must be set",
                ENV_PROJECT_ID
            )));
        }
        if !self.credentials_path.is_file() {
            return Err(BridgeError::Configuration(format!(
                "credentials not found at {}",
                self.credentials_path.display()
            )));
        }
        if self.max_batch_size == 0 {
            return Err(BridgeError::Configuration(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_retry_attempts == 0 {
            return Err(BridgeError::Configuration(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.default_query_limit == 0 {
            return Err(BridgeError::Configuration(
                "default_query_limit must be at least 1".to_string(),
            ));
        }
        if self.backoff_base == 0 {
            return Err(BridgeError::Configuration(
                "backoff_base must be at least 1".to_string(),
            ));
        }
        for (name, ms) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
        ] {
            if ms == 0 {
                return Err(BridgeError::Configuration(format!(
                    "{} must be at least 1",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn project_id(mut self, id: impl Into<String>) -> Self {
        self.config.project_id = id.into();
        self
    }

    pub fn credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.credentials_path = path.into();
        self
    }

    pub fn collections(mut self, collections: Collections) -> Self {
        self.config.collections = collections;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.max_batch_size = size;
        self
    }

    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.config.max_retry_attempts = attempts;
        self
    }

    pub fn default_query_limit(mut self, limit: usize) -> Self {
        self.config.default_query_limit = limit;
        self
    }

    /// Set the backoff base and time unit
    pub fn backoff(mut self, base: u32, unit: Duration) -> Self {
        self.config.backoff_base = base;
        self.config.backoff_unit = unit;
        self
    }

    pub fn read_workers(mut self, count: usize) -> Self {
        self.config.read_workers = count;
        self
    }

    /// Set the remote store address
    pub fn endpoint(mut self, addr: impl Into<String>) -> Self {
        self.config.endpoint = addr.into();
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
