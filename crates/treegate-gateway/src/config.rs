//! Gateway configuration, loaded from a TOML file.
//!
//! `MaxLeaseTime` and the store backend choice are typed configuration
//! passed to the components at construction; nothing reads the process
//! environment at request time.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default lease lifetime: two hours.
pub const DEFAULT_MAX_LEASE_TIME_MS: u64 = 2 * 60 * 60 * 1000;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9100;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}

/// Which lease store backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Single-process on-disk SQLite store.
    Embedded,
    /// Raft-replicated store shared by several gateway nodes.
    Replicated,
}

/// Store backend selection and paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Backend toggle.
    pub backend: StoreBackend,
    /// Database file for the embedded backend.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Embedded,
            db_path: PathBuf::from("leases.db"),
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Address the API server binds to.
    pub listen_addr: SocketAddr,
    /// Path to the repository access configuration (JSON).
    pub access_config: PathBuf,
    /// System-wide ceiling on lease age, in milliseconds.
    pub max_lease_time_ms: u64,
    /// Directory verified payloads are spooled into.
    pub spool_dir: PathBuf,
    /// Port for the Prometheus metrics endpoint; 0 disables it.
    pub metrics_port: u16,
    /// Lease store settings.
    pub store: StoreConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:4929".parse().expect("valid default address"),
            access_config: PathBuf::from("access.json"),
            max_lease_time_ms: DEFAULT_MAX_LEASE_TIME_MS,
            spool_dir: PathBuf::from("spool"),
            metrics_port: DEFAULT_METRICS_PORT,
            store: StoreConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The maximum lease age as a typed duration.
    #[must_use]
    pub const fn max_lease_time(&self) -> Duration {
        Duration::from_millis(self.max_lease_time_ms)
    }
}
