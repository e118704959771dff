// Core data structures for stacport

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stac::geometry::Rectangle;

/// Registered source catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub description: String,
    pub stac_version: Option<String>,
    pub added_on: DateTime<Utc>,
    /// Number of stored search parameter rows owned by this catalog
    #[serde(default)]
    pub stored_search_parameters_count: usize,
}

/// New catalog registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCatalog {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
}

impl NewCatalog {
    pub fn new(name: impl Into<String>, url: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            description: description.into(),
        }
    }
}

/// Harvested collection, unique per (id, catalog_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub catalog_id: i64,
    #[serde(rename = "type")]
    pub collection_type: String,
    pub title: String,
    pub description: String,
    pub temporal_extent_start: Option<DateTime<Utc>>,
    pub temporal_extent_end: Option<DateTime<Utc>>,
    /// Union of declared bboxes as `MULTIPOLYGON` WKT (SRID 4326)
    pub spatial_extent_wkt: String,
    /// Bounding box of the spatial extent
    pub bbox: Rectangle,
}

/// Persisted, replayable ingestion request for one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSearchParameters {
    pub id: i64,
    pub catalog_id: i64,
    /// `None` for catalog-wide requests
    pub collection: Option<String>,
    /// JSON-encoded bbox, if the request had one
    pub bbox: Option<String>,
    /// JSON-encoded datetime, if the request had one
    pub datetime: Option<String>,
    /// Canonical JSON of the whole request (dedup key)
    pub used_search_parameters: String,
}

/// Lifecycle state of an ingestion job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionState {
    Pending,
    Completed,
    Failed,
}

impl IngestionState {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionState::Pending => "pending",
            IngestionState::Completed => "completed",
            IngestionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, IngestionState::Pending)
    }
}

impl std::str::FromStr for IngestionState {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IngestionState::Pending),
            "completed" => Ok(IngestionState::Completed),
            "failed" => Ok(IngestionState::Failed),
            other => Err(crate::error::Error::other(format!(
                "unknown ingestion state: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for IngestionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result counters reported by the ingestion microservice
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionCounters {
    pub newly_stored_collections: Vec<String>,
    pub newly_stored_collections_count: i64,
    pub updated_collections: Vec<String>,
    pub updated_collections_count: i64,
    pub newly_stored_items_count: i64,
    pub updated_items_count: i64,
    pub already_stored_items_count: i64,
}

/// One dispatched ingestion job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionStatus {
    pub id: i64,
    pub source_stac_api_url: String,
    pub target_stac_api_url: String,
    pub update: bool,
    pub state: IngestionState,
    pub time_started: DateTime<Utc>,
    /// `None` while pending
    pub time_finished: Option<DateTime<Utc>>,
    /// Set only on failure
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub counters: IngestionCounters,
}
