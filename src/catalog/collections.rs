//! Collection rows owned by a catalog
//!
//! Rows are keyed by `(id, catalog_id)`: the same collection id may appear
//! under several catalogs. Writes take a `&Connection` so the harvester can
//! run a whole catalog batch inside one transaction.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::models::Collection;
use crate::stac::extent::StacCollection;
use crate::stac::geometry::{Rectangle, SRID_WGS84};
use crate::stac::temporal::to_storage;
use crate::storage::{optional_time_column, Database};

pub(crate) const COLLECTION_COLUMNS: &str = "id, catalog_id, type, title, description,
    temporal_extent_start, temporal_extent_end, spatial_extent_wkt,
    bbox_min_x, bbox_min_y, bbox_max_x, bbox_max_y";

pub(crate) fn collection_from_row(row: &Row<'_>) -> rusqlite::Result<Collection> {
    Ok(Collection {
        id: row.get(0)?,
        catalog_id: row.get(1)?,
        collection_type: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        temporal_extent_start: optional_time_column(row, 5)?,
        temporal_extent_end: optional_time_column(row, 6)?,
        spatial_extent_wkt: row.get(7)?,
        bbox: Rectangle {
            min_x: row.get(8)?,
            min_y: row.get(9)?,
            max_x: row.get(10)?,
            max_y: row.get(11)?,
        },
    })
}

/// Whether an upsert created or replaced a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Access to harvested collections
#[derive(Clone)]
pub struct CollectionStore {
    db: Database,
}

impl CollectionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or update one collection of `catalog_id`
    pub fn upsert(
        conn: &Connection,
        catalog_id: i64,
        collection: &StacCollection,
    ) -> Result<UpsertOutcome> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM collections WHERE id = ?1 AND catalog_id = ?2)",
            params![collection.id, catalog_id],
            |row| row.get(0),
        )?;

        let extent = &collection.extent;
        let bbox = extent.spatial.bounding_box();
        conn.execute(
            r#"
                INSERT INTO collections (
                    id, catalog_id, type, title, description,
                    temporal_extent_start, temporal_extent_end,
                    spatial_extent_wkt, srid,
                    bbox_min_x, bbox_min_y, bbox_max_x, bbox_max_y
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(id, catalog_id) DO UPDATE SET
                    type = excluded.type,
                    title = excluded.title,
                    description = excluded.description,
                    temporal_extent_start = excluded.temporal_extent_start,
                    temporal_extent_end = excluded.temporal_extent_end,
                    spatial_extent_wkt = excluded.spatial_extent_wkt,
                    srid = excluded.srid,
                    bbox_min_x = excluded.bbox_min_x,
                    bbox_min_y = excluded.bbox_min_y,
                    bbox_max_x = excluded.bbox_max_x,
                    bbox_max_y = excluded.bbox_max_y
                "#,
            params![
                collection.id,
                catalog_id,
                collection.collection_type,
                collection.title,
                collection.description,
                extent.temporal_start().as_ref().map(to_storage),
                extent.temporal_end().as_ref().map(to_storage),
                extent.spatial.to_wkt(),
                SRID_WGS84,
                bbox.min_x,
                bbox.min_y,
                bbox.max_x,
                bbox.max_y,
            ],
        )?;

        Ok(if exists {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    /// Delete collections of `catalog_id` whose id is not in `keep`
    ///
    /// The catalog's stored search parameters for those collections are
    /// deleted as well. Returns the retired collection ids.
    pub fn retire_missing(
        conn: &Connection,
        catalog_id: i64,
        keep: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let existing: Vec<String> = {
            let mut stmt = conn.prepare("SELECT id FROM collections WHERE catalog_id = ?1")?;
            let rows = stmt.query_map(params![catalog_id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let retired: Vec<String> = existing
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();

        for id in &retired {
            conn.execute(
                "DELETE FROM collections WHERE id = ?1 AND catalog_id = ?2",
                params![id, catalog_id],
            )?;
            conn.execute(
                "DELETE FROM stored_search_parameters WHERE collection = ?1 AND catalog_id = ?2",
                params![id, catalog_id],
            )?;
        }

        Ok(retired)
    }

    /// One collection of a catalog
    pub fn get(&self, catalog_id: i64, collection_id: &str) -> Result<Option<Collection>> {
        self.db.with_conn(|conn| {
            let sql =
                format!("SELECT {COLLECTION_COLUMNS} FROM collections WHERE catalog_id = ?1 AND id = ?2");
            Ok(conn
                .query_row(&sql, params![catalog_id, collection_id], collection_from_row)
                .optional()?)
        })
    }

    /// All collections of a catalog ordered by id
    pub fn list_for_catalog(&self, catalog_id: i64) -> Result<Vec<Collection>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLLECTION_COLUMNS} FROM collections WHERE catalog_id = ?1 ORDER BY id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![catalog_id], collection_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Number of indexed collections across all catalogs
    pub fn count(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM collections", [], |r| r.get(0))?;
            Ok(count.max(0) as usize)
        })
    }
}
