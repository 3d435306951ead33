//! Exporter configuration.
//!
//! The configuration is resolved exactly once at startup into an immutable
//! [`ExporterConfig`] that is passed by reference to the collector and the
//! server; there is no ambient global state. Missing required configuration
//! is a hard startup failure, never a retryable condition.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Environment variable holding the PostgreSQL connection string.
pub const DATA_SOURCE_ENV: &str = "DATA_SOURCE_NAME";

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The required data source locator is absent from the environment.
    #[error("couldn't find environment variable {DATA_SOURCE_ENV}")]
    MissingDataSource,

    /// The listen address does not parse as `host:port`.
    #[error("invalid listen address {0:?}: {1}")]
    InvalidListenAddress(String, std::net::AddrParseError),

    /// The telemetry path must start with '/' and must not shadow the
    /// landing page at the root.
    #[error("invalid telemetry path {0:?}: must start with '/' and not be '/'")]
    InvalidTelemetryPath(String),
}

/// Immutable run configuration.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Address to listen on for web interface and telemetry.
    pub listen_address: SocketAddr,

    /// Path under which to expose metrics.
    pub telemetry_path: String,

    /// Optional path to user query definitions.
    pub queries_path: Option<PathBuf>,

    /// Dump the metric maps and exit instead of serving.
    pub dump_maps: bool,

    /// Upper bound on each database operation during a scrape.
    pub query_timeout: Duration,

    /// PostgreSQL connection string. Empty only in dump-only mode, which
    /// never touches the server.
    pub dsn: String,
}

impl ExporterConfig {
    /// Resolve the configuration from command-line values and the
    /// environment.
    ///
    /// # Errors
    /// Returns `ConfigError` if the address or path is invalid, or if the
    /// DSN is missing while not in dump-only mode.
    pub fn resolve(
        listen_address: &str,
        telemetry_path: &str,
        queries_path: Option<PathBuf>,
        dump_maps: bool,
        query_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let dsn = std::env::var(DATA_SOURCE_ENV).ok();
        Self::from_parts(listen_address, telemetry_path, queries_path, dump_maps, query_timeout, dsn)
    }

    fn from_parts(
        listen_address: &str,
        telemetry_path: &str,
        queries_path: Option<PathBuf>,
        dump_maps: bool,
        query_timeout: Duration,
        dsn: Option<String>,
    ) -> Result<Self, ConfigError> {
        let listen_address = listen_address
            .parse()
            .map_err(|e| ConfigError::InvalidListenAddress(listen_address.to_string(), e))?;

        if !telemetry_path.starts_with('/') || telemetry_path == "/" {
            return Err(ConfigError::InvalidTelemetryPath(telemetry_path.to_string()));
        }

        let dsn = match dsn {
            Some(dsn) if !dsn.is_empty() => dsn,
            _ if dump_maps => String::new(),
            _ => return Err(ConfigError::MissingDataSource),
        };

        Ok(Self {
            listen_address,
            telemetry_path: telemetry_path.to_string(),
            queries_path,
            dump_maps,
            query_timeout,
            dsn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn resolve(
        listen_address: &str,
        telemetry_path: &str,
        dump_maps: bool,
        dsn: Option<&str>,
    ) -> Result<ExporterConfig, ConfigError> {
        ExporterConfig::from_parts(
            listen_address,
            telemetry_path,
            None,
            dump_maps,
            TIMEOUT,
            dsn.map(str::to_string),
        )
    }

    #[test]
    fn test_valid_config() {
        let config =
            resolve("0.0.0.0:9187", "/metrics", false, Some("postgres://localhost/postgres"))
                .unwrap();
        assert_eq!(config.listen_address.port(), 9187);
        assert_eq!(config.telemetry_path, "/metrics");
        assert_eq!(config.dsn, "postgres://localhost/postgres");
    }

    #[test]
    fn test_missing_dsn_is_fatal() {
        let result = resolve("0.0.0.0:9187", "/metrics", false, None);
        assert!(matches!(result, Err(ConfigError::MissingDataSource)));

        let result = resolve("0.0.0.0:9187", "/metrics", false, Some(""));
        assert!(matches!(result, Err(ConfigError::MissingDataSource)));
    }

    #[test]
    fn test_dump_maps_does_not_require_dsn() {
        let config = resolve("0.0.0.0:9187", "/metrics", true, None).unwrap();
        assert!(config.dump_maps);
        assert!(config.dsn.is_empty());
    }

    #[test]
    fn test_invalid_listen_address() {
        let result = resolve(":9187", "/metrics", false, Some("postgres://x"));
        assert!(matches!(result, Err(ConfigError::InvalidListenAddress(..))));
    }

    #[test]
    fn test_invalid_telemetry_path() {
        for path in ["metrics", "/"] {
            let result = resolve("0.0.0.0:9187", path, false, Some("postgres://x"));
            assert!(matches!(result, Err(ConfigError::InvalidTelemetryPath(_))), "path {path:?}");
        }
    }
}
