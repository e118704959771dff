//! stacport - STAC catalog harvester with replayable ingestion jobs
//!
//! Harvests collection metadata from public STAC catalogs into a local index,
//! answers bbox + time interval searches over it, and orchestrates ingestion
//! jobs run by an external microservice.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`stac`] - Geometry, timestamps, typed collection documents, HTTP access
//! - [`storage`] - SQLite database handle and schema
//! - [`catalog`] - Registry of source catalogs and their collections
//! - [`harvester`] - Discovery, validation and harvesting of remote catalogs
//! - [`search`] - Spatiotemporal collection search
//! - [`ingestion`] - Stored requests, status tracking and job dispatch
//! - [`server`] - HTTP API
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use stacport::config::Config;
//! use stacport::search::SearchIndex;
//! use stacport::storage::Database;
//!
//! fn main() -> stacport::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Database::open(&config.database.sqlite_path)?;
//!     let groups = SearchIndex::new(db).search(&[-1.0, 50.0, 1.0, 51.0], "2021-01-01T00:00:00Z/..", None)?;
//!     println!("{} catalogs matched", groups.len());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod harvester;
pub mod ingestion;
pub mod metrics;
pub mod models;
pub mod search;
pub mod server;
pub mod stac;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::catalog::{CatalogRegistry, CollectionStore};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::harvester::{CollectionHarvester, HarvestReport};
    pub use crate::ingestion::{
        IngestionDispatcher, IngestionStatusTracker, JobHandle, JobSelector, SearchParameterStore,
        SearchParameters,
    };
    pub use crate::models::{Catalog, Collection, IngestionState, IngestionStatus};
    pub use crate::search::{CatalogSearchGroup, SearchIndex};
    pub use crate::storage::Database;
}

// Direct re-exports for convenience
pub use error::{Error, Result};
