//! Unified error handling for the stacport crate
//!
//! Every subsystem reports failures through the single [`Error`] enum so that
//! errors can cross module boundaries (harvester -> registry -> HTTP layer)
//! without conversion glue.
//!
//! # Architecture
//!
//! - [`ErrorCategory`] - Classification used by callers to pick a handling strategy
//! - [`Error`] - The error enum, one variant per failure the system distinguishes
//!
//! Validation failures (`ConvertingTimestamp`, `InvalidBbox`, unknown ids) are
//! always reported synchronously to the immediate caller. Failures of a
//! dispatched ingestion job never surface here; they are recorded on the
//! ingestion status row instead.

use std::io;
use thiserror::Error;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller supplied malformed input, or upstream data failed validation
    Validation,
    /// Referenced entity does not exist
    NotFound,
    /// Entity already exists
    Conflict,
    /// Remote catalog or ingestion microservice unreachable or misbehaving
    Network,
    /// Relational store failure
    Storage,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the stacport crate
#[derive(Error, Debug)]
pub enum Error {
    /// A catalog with the same source URL is already registered
    #[error("Catalog already exists: {url}")]
    CatalogAlreadyExists { url: String },

    /// No catalog matches the given id (or URL)
    #[error("Catalog does not exist: {0}")]
    CatalogDoesNotExist(String),

    /// The target catalog already holds a collection with this id
    #[error("Collection already exists: {0}")]
    CollectionAlreadyExists(String),

    /// The collection is unknown locally or remotely
    #[error("Collection does not exist: {0}")]
    CollectionDoesNotExist(String),

    /// A temporal string matched none of the accepted formats
    #[error("Could not convert timestamp: {0}")]
    ConvertingTimestamp(String),

    /// Bounding box with the wrong arity, non-finite values or inverted corners
    #[error("Invalid bbox: {0}")]
    InvalidBbox(String),

    /// A collection write was rejected, locally or by the target catalog
    #[error("Invalid payload (status {status}): {message}")]
    InvalidPayload { status: u16, message: String },

    /// Transport failure reaching the ingestion microservice
    #[error("Ingestion microservice unavailable: {0}")]
    MicroserviceUnavailable(String),

    /// The ingestion microservice answered with a non-success status
    #[error("Ingestion microservice returned {status}: {body}")]
    IngestionRejected { status: u16, body: String },

    /// No ingestion status row with this id
    #[error("Ingestion status not found: {0}")]
    StatusNotFound(i64),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConvertingTimestamp(_) | Self::InvalidBbox(_) | Self::InvalidPayload { .. } => {
                ErrorCategory::Validation
            }
            Self::CatalogDoesNotExist(_)
            | Self::CollectionDoesNotExist(_)
            | Self::StatusNotFound(_) => ErrorCategory::NotFound,
            Self::CatalogAlreadyExists { .. } | Self::CollectionAlreadyExists(_) => {
                ErrorCategory::Conflict
            }
            Self::MicroserviceUnavailable(_) | Self::IngestionRejected { .. } | Self::Http(_) => {
                ErrorCategory::Network
            }
            Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Validation,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::MicroserviceUnavailable(_) | Self::Http(_) => true,
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// Text recorded on a FAILED ingestion status
    ///
    /// The microservice's own response body or the transport error text,
    /// without the local prefix.
    pub fn failure_message(&self) -> String {
        match self {
            Self::IngestionRejected { body, .. } => body.clone(),
            Self::MicroserviceUnavailable(text) => text.clone(),
            other => other.to_string(),
        }
    }

    /// True when the error is a SQLite unique-constraint violation
    pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        )
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let err = Error::ConvertingTimestamp("2021-13-01".to_string());
        assert_eq!(err.category(), ErrorCategory::Validation);

        let err = Error::CatalogDoesNotExist("7".to_string());
        assert_eq!(err.category(), ErrorCategory::NotFound);

        let err = Error::CatalogAlreadyExists {
            url: "https://example.com/stac".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn test_is_recoverable() {
        let err = Error::MicroserviceUnavailable("connection refused".to_string());
        assert!(err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Network);

        let err = Error::InvalidBbox("expected 4 values".to_string());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing target url");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("Something went wrong");
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.to_string(), "Something went wrong");
    }

    #[test]
    fn test_unique_violation_detection() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        assert!(Error::is_unique_violation(&err));
    }
}
