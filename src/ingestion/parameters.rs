//! Replayable ingestion requests
//!
//! Every dispatched request is persisted so it can later be replayed with
//! `update = true`. A request naming several collections is fanned out into
//! one row per collection; a request without collections becomes a single
//! catalog-wide row.
//!
//! The `used_search_parameters` column holds the canonical JSON of the
//! request and carries a UNIQUE constraint. Inserting a row that already
//! exists is an expected outcome (`ON CONFLICT DO NOTHING`), counted as a
//! duplicate rather than raised. This avoids redundant stored queries; it is
//! not a concurrency guard, two identical dispatches may still both run.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::StoredSearchParameters;
use crate::storage::Database;

/// Parameters of one ingestion request, as sent to the microservice
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_stac_catalog_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_stac_catalog_url: Option<String>,

    #[serde(default)]
    pub update: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,

    /// Correlation id, the ingestion status row id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<i64>,
}

impl SearchParameters {
    /// Requested collections, empty when the request is catalog-wide
    pub fn collection_list(&self) -> &[String] {
        self.collections.as_deref().unwrap_or_default()
    }

    /// Copies narrowed to a single collection each, or one catalog-wide copy
    pub fn fan_out(&self) -> Vec<SearchParameters> {
        match self.collection_list() {
            [] => vec![SearchParameters {
                collections: None,
                ..self.clone()
            }],
            collections => collections
                .iter()
                .map(|collection| SearchParameters {
                    collections: Some(vec![collection.clone()]),
                    ..self.clone()
                })
                .collect(),
        }
    }

    /// Canonical JSON used as the dedup key
    ///
    /// Target URL and callback id are excluded: they are stamped per dispatch
    /// and would make every stored row unique.
    pub fn canonical_json(&self) -> Result<String> {
        let key = SearchParameters {
            target_stac_catalog_url: None,
            callback_id: None,
            ..self.clone()
        };
        Ok(serde_json::to_string(&key)?)
    }
}

/// Result of [`SearchParameterStore::persist`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    /// Rows newly written
    pub stored: usize,
    /// Rows skipped because an identical request was already stored
    pub duplicates: usize,
}

impl StoredSearchParameters {
    /// Decode the stored request
    pub fn parameters(&self) -> Result<SearchParameters> {
        Ok(serde_json::from_str(&self.used_search_parameters)?)
    }
}

fn stored_from_row(row: &Row<'_>) -> rusqlite::Result<StoredSearchParameters> {
    Ok(StoredSearchParameters {
        id: row.get(0)?,
        catalog_id: row.get(1)?,
        collection: row.get(2)?,
        bbox: row.get(3)?,
        datetime: row.get(4)?,
        used_search_parameters: row.get(5)?,
    })
}

const COLUMNS: &str = "id, catalog_id, collection, bbox, datetime, used_search_parameters";

/// Persistence for replayable ingestion requests
#[derive(Clone)]
pub struct SearchParameterStore {
    db: Database,
}

impl SearchParameterStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store `params` for `catalog_id`, one row per collection
    pub fn persist(&self, catalog_id: i64, params: &SearchParameters) -> Result<PersistOutcome> {
        let rows = params
            .fan_out()
            .into_iter()
            .map(|p| {
                let collection = p.collections.as_ref().and_then(|c| c.first().cloned());
                let bbox = p.bbox.as_ref().map(serde_json::to_string).transpose()?;
                let datetime = p.datetime.as_ref().map(serde_json::to_string).transpose()?;
                Ok((collection, bbox, datetime, p.canonical_json()?))
            })
            .collect::<Result<Vec<_>>>()?;

        let outcome = self.db.transaction(|tx| {
            let mut outcome = PersistOutcome::default();
            for (collection, bbox, datetime, key) in &rows {
                let inserted = tx.execute(
                    r#"
                        INSERT INTO stored_search_parameters
                            (catalog_id, collection, bbox, datetime, used_search_parameters)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        ON CONFLICT(used_search_parameters) DO NOTHING
                        "#,
                    params![catalog_id, collection, bbox, datetime, key],
                )?;
                if inserted == 0 {
                    outcome.duplicates += 1;
                } else {
                    outcome.stored += 1;
                }
            }
            Ok(outcome)
        })?;

        tracing::debug!(
            catalog_id,
            stored = outcome.stored,
            duplicates = outcome.duplicates,
            "Search parameters persisted"
        );
        Ok(outcome)
    }

    /// Delete every row for `collection_id`, returns the number removed
    pub fn remove_for_collection(&self, collection_id: &str) -> Result<usize> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM stored_search_parameters WHERE collection = ?1",
                params![collection_id],
            )?)
        })?;
        tracing::info!(collection = %collection_id, removed, "Stored search parameters removed");
        Ok(removed)
    }

    /// Rows of a catalog, optionally restricted to rows whose collection is in `filter`
    ///
    /// An empty or absent filter returns every row of the catalog.
    /// Catalog-wide rows never match a non-empty filter.
    pub fn list_for_catalog(
        &self,
        catalog_id: i64,
        filter: Option<&[String]>,
    ) -> Result<Vec<StoredSearchParameters>> {
        let rows = self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM stored_search_parameters WHERE catalog_id = ?1 ORDER BY id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![catalog_id], stored_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        let Some(filter) = filter.filter(|f| !f.is_empty()) else {
            return Ok(rows);
        };

        Ok(rows
            .into_iter()
            .filter(|row| match row.parameters() {
                Ok(params) => params.collection_list().iter().any(|c| filter.contains(c)),
                Err(_) => row
                    .collection
                    .as_ref()
                    .is_some_and(|c| filter.contains(c)),
            })
            .collect())
    }

    /// Every stored row
    pub fn list_all(&self) -> Result<Vec<StoredSearchParameters>> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {COLUMNS} FROM stored_search_parameters ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], stored_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}
