//! Spatiotemporal search over harvested collections
//!
//! A collection matches when its spatial extent intersects the query
//! rectangle and its temporal extent overlaps the query interval:
//!
//! ```text
//! (collection.end   IS NULL OR collection.end   >= query.start)
//! AND (collection.start IS NULL OR collection.start <= query.end)
//! ```
//!
//! SQLite narrows candidates using the stored bounding box columns and the
//! sortable timestamp text; the exact multi-rectangle test runs afterwards.

use std::collections::BTreeMap;

use rusqlite::{params, ToSql};
use serde::Serialize;

use crate::catalog::collections::{collection_from_row, COLLECTION_COLUMNS};
use crate::catalog::CatalogRegistry;
use crate::error::Result;
use crate::models::{Catalog, Collection};
use crate::stac::geometry::{MultiRectangle, Rectangle};
use crate::stac::temporal::{to_storage, TimeInterval};
use crate::storage::Database;

/// Matching collections of one catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogSearchGroup {
    pub catalog: Catalog,
    pub collections: Vec<Collection>,
}

/// Read side of the collection index
#[derive(Clone)]
pub struct SearchIndex {
    db: Database,
    registry: CatalogRegistry,
}

impl SearchIndex {
    pub fn new(db: Database) -> Self {
        Self {
            registry: CatalogRegistry::new(db.clone()),
            db,
        }
    }

    /// Collections intersecting `bbox` and `interval`, grouped by catalog
    ///
    /// Without `catalog_id` only catalogs with at least one match are
    /// returned. With it, exactly that catalog's group is returned, possibly
    /// empty.
    pub fn search(
        &self,
        bbox: &[f64],
        interval: &str,
        catalog_id: Option<i64>,
    ) -> Result<Vec<CatalogSearchGroup>> {
        let query = Rectangle::from_query_bbox(bbox)?;
        let window = TimeInterval::parse(interval)?;

        let scoped = catalog_id.map(|id| self.registry.get(id)).transpose()?;

        let candidates = self.candidates(&query, &window, catalog_id)?;
        let mut matched: BTreeMap<i64, Vec<Collection>> = BTreeMap::new();
        for collection in candidates {
            if matches(&collection, &query, &window)? {
                matched
                    .entry(collection.catalog_id)
                    .or_default()
                    .push(collection);
            }
        }

        let groups = match scoped {
            Some(catalog) => {
                let collections = matched.remove(&catalog.id).unwrap_or_default();
                vec![CatalogSearchGroup {
                    catalog,
                    collections,
                }]
            }
            None => matched
                .into_iter()
                .map(|(id, collections)| {
                    Ok(CatalogSearchGroup {
                        catalog: self.registry.get(id)?,
                        collections,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        tracing::debug!(
            bbox = ?query.to_array(),
            interval = %window,
            groups = groups.len(),
            "Collection search"
        );
        Ok(groups)
    }

    fn candidates(
        &self,
        query: &Rectangle,
        window: &TimeInterval,
        catalog_id: Option<i64>,
    ) -> Result<Vec<Collection>> {
        let start = window.start.as_ref().map(to_storage);
        let end = window.end.as_ref().map(to_storage);

        let mut sql = format!(
            r#"
            SELECT {COLLECTION_COLUMNS} FROM collections
            WHERE bbox_max_x >= ?1 AND bbox_min_x <= ?2
              AND bbox_max_y >= ?3 AND bbox_min_y <= ?4
              AND (?5 IS NULL OR temporal_extent_end IS NULL OR temporal_extent_end >= ?5)
              AND (?6 IS NULL OR temporal_extent_start IS NULL OR temporal_extent_start <= ?6)
            "#
        );
        if catalog_id.is_some() {
            sql.push_str(" AND catalog_id = ?7");
        }
        sql.push_str(" ORDER BY catalog_id, id");

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let base = params![query.min_x, query.max_x, query.min_y, query.max_y, start, end];
            let mut args: Vec<&dyn ToSql> = base.to_vec();
            if let Some(id) = catalog_id.as_ref() {
                args.push(id);
            }
            let rows = stmt.query_map(args.as_slice(), collection_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}

fn matches(collection: &Collection, query: &Rectangle, window: &TimeInterval) -> Result<bool> {
    let extent = TimeInterval {
        start: collection.temporal_extent_start,
        end: collection.temporal_extent_end,
    };
    if !extent.overlaps(window) {
        return Ok(false);
    }
    Ok(MultiRectangle::from_wkt(&collection.spatial_extent_wkt)?.intersects(query))
}
