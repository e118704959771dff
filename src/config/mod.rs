//! Configuration management for stacport
//!
//! Configuration is loaded from a TOML file or from environment variables
//! and validated once at startup. Deployment variable names from the
//! existing ingestion stack (`TARGET_STAC_API_SERVER`,
//! `STAC_SELECTIVE_INGESTER_*`, ...) are honored as-is; everything else uses
//! the `STACPORT_` prefix.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Catalog discovery and harvesting
    pub harvester: HarvesterConfig,

    /// Ingestion microservice
    pub ingestion: IngestionConfig,

    /// Target STAC API
    pub stac_api: StacApiConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0:5000"),
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/stacport.db"),
        }
    }
}

/// Harvester configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvesterConfig {
    /// Third-party catalog index queried by discovery
    pub catalog_index_url: String,

    /// Requests per second towards remote catalogs (shared)
    pub requests_per_second: u32,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Catalogs harvested concurrently during a sync
    pub max_concurrent_harvests: usize,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            catalog_index_url: String::from("https://stacindex.org/api/catalogs"),
            requests_per_second: 5,
            request_timeout_secs: 30,
            max_concurrent_harvests: 4,
        }
    }
}

/// Ingestion microservice configuration
///
/// Either `endpoint` is set, or the endpoint is resolved by expanding
/// `cidr_range` into hosts and combining them with `protocol`, `port` and
/// `path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Fixed endpoint URL (takes precedence over CIDR resolution)
    pub endpoint: Option<String>,

    /// CIDR range the microservice is deployed in
    pub cidr_range: String,

    /// Port of the microservice
    pub port: u16,

    /// `http` or `https`
    pub protocol: String,

    /// Path of the ingestion route
    pub path: String,

    /// Connect timeout in seconds; requests themselves never time out
    pub connect_timeout_secs: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            cidr_range: String::from("172.17.0.1/32"),
            port: 9001,
            protocol: String::from("http"),
            path: String::from("/"),
            connect_timeout_secs: 5,
        }
    }
}

/// Target STAC API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StacApiConfig {
    /// URL the ingestion microservice writes into
    pub target_url: String,

    /// URL the read proxy talks to
    pub base_url: String,
}

impl Default for StacApiConfig {
    fn default() -> Self {
        Self {
            target_url: String::from("http://localhost:8082"),
            base_url: String::from("http://localhost:8082"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::config(format!("{key}: cannot parse '{raw}'"))),
        None => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_string("STACPORT_BIND_ADDRESS") {
            config.server.bind_address = v;
        }
        if let Some(v) = env_string("STACPORT_SQLITE_PATH") {
            config.database.sqlite_path = PathBuf::from(v);
        }

        if let Some(v) = env_string("STACPORT_CATALOG_INDEX_URL") {
            config.harvester.catalog_index_url = v;
        }
        if let Some(v) = env_parse("STACPORT_RATE_LIMIT")? {
            config.harvester.requests_per_second = v;
        }
        if let Some(v) = env_parse("STACPORT_REQUEST_TIMEOUT")? {
            config.harvester.request_timeout_secs = v;
        }
        if let Some(v) = env_parse("STACPORT_MAX_CONCURRENT_HARVESTS")? {
            config.harvester.max_concurrent_harvests = v;
        }

        config.ingestion.endpoint = env_string("STAC_SELECTIVE_INGESTER_ENDPOINT");
        if let Some(v) = env_string("STAC_SELECTIVE_INGESTER_CIDR_RANGE") {
            config.ingestion.cidr_range = v;
        }
        if let Some(v) = env_parse("STAC_SELECTIVE_INGESTER_PORT")? {
            config.ingestion.port = v;
        }
        if let Some(v) = env_string("STAC_SELECTIVE_INGESTER_PROTOCOL") {
            config.ingestion.protocol = v;
        }

        if let Some(v) = env_string("TARGET_STAC_API_SERVER") {
            config.stac_api.target_url = v;
        }
        if let Some(v) = env_string("BASE_STAC_API_URL") {
            config.stac_api.base_url = v;
        }

        if let Some(v) = env_string("STACPORT_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = env_string("STACPORT_LOG_FORMAT") {
            config.logging.format = v;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse TOML config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.bind_address()?;

        if self.harvester.requests_per_second == 0 {
            return Err(Error::config("harvester.requests_per_second must be > 0"));
        }
        if self.harvester.max_concurrent_harvests == 0 {
            return Err(Error::config("harvester.max_concurrent_harvests must be > 0"));
        }
        for (field, value) in [
            ("harvester.catalog_index_url", &self.harvester.catalog_index_url),
            ("stac_api.target_url", &self.stac_api.target_url),
            ("stac_api.base_url", &self.stac_api.base_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| Error::config(format!("{field}: invalid URL '{value}': {e}")))?;
        }

        match &self.ingestion.endpoint {
            Some(endpoint) => {
                url::Url::parse(endpoint).map_err(|e| {
                    Error::config(format!("ingestion.endpoint: invalid URL '{endpoint}': {e}"))
                })?;
            }
            None => {
                if !matches!(self.ingestion.protocol.as_str(), "http" | "https") {
                    return Err(Error::config(format!(
                        "ingestion.protocol must be http or https, got '{}'",
                        self.ingestion.protocol
                    )));
                }
                crate::ingestion::client::expand_cidr(&self.ingestion.cidr_range)?;
            }
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(Error::config(format!(
                "logging.format must be text or json, got '{}'",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Parsed server bind address
    pub fn bind_address(&self) -> Result<SocketAddr> {
        self.server.bind_address.parse().map_err(|_| {
            Error::config(format!(
                "server.bind_address: invalid address '{}'",
                self.server.bind_address
            ))
        })
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.harvester.request_timeout_secs)
    }
}
