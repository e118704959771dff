//! Catalog registry and the collections harvested from each catalog
//!
//! - [`CatalogRegistry`] - CRUD over registered source catalogs
//! - [`collections`] - Collection rows owned by a catalog

pub mod collections;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::models::{Catalog, NewCatalog};
use crate::stac::client::normalize_catalog_url;
use crate::stac::temporal::to_storage;
use crate::storage::{time_column, Database};

pub use collections::CollectionStore;

const CATALOG_COLUMNS: &str = "c.id, c.name, c.url, c.description, c.stac_version, c.added_on,
    (SELECT COUNT(*) FROM stored_search_parameters p WHERE p.catalog_id = c.id)";

fn catalog_from_row(row: &Row<'_>) -> rusqlite::Result<Catalog> {
    let count: i64 = row.get(6)?;
    Ok(Catalog {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        description: row.get(3)?,
        stac_version: row.get(4)?,
        added_on: time_column(row, 5)?,
        stored_search_parameters_count: count.max(0) as usize,
    })
}

/// Registry of known source catalogs
#[derive(Clone)]
pub struct CatalogRegistry {
    db: Database,
}

impl CatalogRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a catalog
    ///
    /// The URL is stored without trailing slashes. A URL that is already
    /// registered yields [`Error::CatalogAlreadyExists`].
    pub fn register(&self, new: &NewCatalog) -> Result<Catalog> {
        let url = normalize_catalog_url(&new.url);
        let now = to_storage(&Utc::now());

        let id = self.db.with_conn(|conn| {
            match conn.execute(
                "INSERT INTO catalogs (name, url, description, added_on) VALUES (?1, ?2, ?3, ?4)",
                params![new.name, url, new.description, now],
            ) {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(e) if Error::is_unique_violation(&e) => Err(Error::CatalogAlreadyExists {
                    url: url.clone(),
                }),
                Err(e) => Err(e.into()),
            }
        })?;

        tracing::info!(catalog_id = id, url = %url, name = %new.name, "Catalog registered");
        self.get(id)
    }

    /// Get catalog by id
    pub fn get(&self, id: i64) -> Result<Catalog> {
        self.db
            .with_conn(|conn| Self::find(conn, "c.id = ?1", params![id]))?
            .ok_or_else(|| Error::CatalogDoesNotExist(id.to_string()))
    }

    /// Get catalog by (normalized) source URL
    pub fn get_by_url(&self, url: &str) -> Result<Option<Catalog>> {
        let url = normalize_catalog_url(url);
        self.db
            .with_conn(|conn| Self::find(conn, "c.url = ?1", params![url]))
    }

    fn find(conn: &Connection, filter: &str, args: impl rusqlite::Params) -> Result<Option<Catalog>> {
        let sql = format!("SELECT {CATALOG_COLUMNS} FROM catalogs c WHERE {filter}");
        Ok(conn.query_row(&sql, args, catalog_from_row).optional()?)
    }

    /// All catalogs ordered by id
    pub fn list(&self) -> Result<Vec<Catalog>> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {CATALOG_COLUMNS} FROM catalogs c ORDER BY c.id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], catalog_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Remove a catalog and everything it owns
    ///
    /// Collections, stored search parameters and ingestion status rows go
    /// with it through `ON DELETE CASCADE`.
    pub fn remove(&self, id: i64) -> Result<Catalog> {
        let catalog = self.get(id)?;
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM catalogs WHERE id = ?1", params![id])?;
            Ok(())
        })?;
        tracing::info!(catalog_id = id, url = %catalog.url, "Catalog removed");
        Ok(catalog)
    }

    /// Remove every catalog, returns how many were deleted
    pub fn remove_all(&self) -> Result<usize> {
        let removed = self
            .db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM catalogs", [])?))?;
        tracing::info!(removed, "All catalogs removed");
        Ok(removed)
    }

    /// Record the STAC version a catalog reported
    pub fn set_stac_version(&self, id: i64, stac_version: Option<&str>) -> Result<()> {
        let updated = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE catalogs SET stac_version = ?1 WHERE id = ?2",
                params![stac_version, id],
            )?)
        })?;
        if updated == 0 {
            return Err(Error::CatalogDoesNotExist(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CatalogRegistry {
        CatalogRegistry::new(Database::in_memory().unwrap())
    }

    #[test]
    fn test_register_and_get() {
        let registry = registry();
        let catalog = registry
            .register(&NewCatalog::new(
                "Earth Search",
                "https://earth-search.aws.element84.com/v1/",
                "AWS open data",
            ))
            .unwrap();

        assert_eq!(catalog.url, "https://earth-search.aws.element84.com/v1");
        assert_eq!(catalog.stored_search_parameters_count, 0);
        assert_eq!(registry.get(catalog.id).unwrap(), catalog);
        assert_eq!(
            registry
                .get_by_url("https://earth-search.aws.element84.com/v1")
                .unwrap()
                .map(|c| c.id),
            Some(catalog.id)
        );
    }

    #[test]
    fn test_duplicate_url_is_conflict() {
        let registry = registry();
        registry
            .register(&NewCatalog::new("a", "https://stac.example.com", ""))
            .unwrap();
        let err = registry
            .register(&NewCatalog::new("b", "https://stac.example.com/", ""))
            .unwrap_err();
        assert!(matches!(err, Error::CatalogAlreadyExists { .. }));
    }

    #[test]
    fn test_remove_unknown_catalog() {
        let registry = registry();
        assert!(matches!(
            registry.remove(99),
            Err(Error::CatalogDoesNotExist(_))
        ));
        assert!(matches!(registry.get(99), Err(Error::CatalogDoesNotExist(_))));
    }

    #[test]
    fn test_list_and_remove_all() {
        let registry = registry();
        registry
            .register(&NewCatalog::new("a", "https://a.example.com", ""))
            .unwrap();
        registry
            .register(&NewCatalog::new("b", "https://b.example.com", ""))
            .unwrap();

        let names: Vec<_> = registry.list().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(registry.remove_all().unwrap(), 2);
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_set_stac_version() {
        let registry = registry();
        let catalog = registry
            .register(&NewCatalog::new("a", "https://a.example.com", ""))
            .unwrap();
        registry.set_stac_version(catalog.id, Some("1.0.0")).unwrap();
        assert_eq!(
            registry.get(catalog.id).unwrap().stac_version.as_deref(),
            Some("1.0.0")
        );
    }
}
