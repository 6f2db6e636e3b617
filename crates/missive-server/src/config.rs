//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use missive_shared::constants::RETENTION_DAYS;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database.
    /// Env: `DB_PATH`
    /// Default: `./data/missive.db`
    pub db_path: PathBuf,

    /// Filesystem path where uploaded blobs are stored.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./uploads`
    pub blob_storage_path: PathBuf,

    /// Messages older than this many days are removed by the sweep.
    /// Env: `RETENTION_DAYS`
    /// Default: `7`
    pub retention_days: i64,

    /// Seconds between retention sweeps.
    /// Env: `SWEEP_INTERVAL_SECS`
    /// Default: `3600`
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            db_path: PathBuf::from("./data/missive.db"),
            blob_storage_path: PathBuf::from("./uploads"),
            retention_days: RETENTION_DAYS,
            sweep_interval_secs: 3600,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("BLOB_STORAGE_PATH") {
            config.blob_storage_path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("RETENTION_DAYS") {
            match val.parse::<i64>() {
                Ok(days) if days > 0 => config.retention_days = days,
                _ => tracing::warn!(value = %val, "Invalid RETENTION_DAYS, using default"),
            }
        }

        if let Ok(val) = std::env::var("SWEEP_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.sweep_interval_secs = secs,
                _ => tracing::warn!(value = %val, "Invalid SWEEP_INTERVAL_SECS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.sweep_interval_secs, 3600);
    }
}
