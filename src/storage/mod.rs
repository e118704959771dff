//! SQLite persistence for catalogs, collections, search parameters and job status
//!
//! One [`Database`] handle is shared by every component. It wraps a single
//! connection behind a mutex; each operation takes the lock for the duration
//! of one statement or one transaction, so background tasks never hold
//! in-memory state across calls.
//!
//! # Schema
//!
//! ```text
//! catalogs ─┬─< collections               (catalog_id, ON DELETE CASCADE)
//!           ├─< stored_search_parameters  (catalog_id, ON DELETE CASCADE)
//!           └─< ingestion_status          (source_stac_api_url -> catalogs.url, ON DELETE CASCADE)
//! ```
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text (microsecond
//! precision), so `<`/`>=` comparisons in SQL are chronological.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{types::Type, Connection, Row, Transaction};

use crate::error::{Error, Result};
use crate::stac::temporal::from_storage;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS catalogs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        url TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        stac_version TEXT,
        added_on TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS collections (
        id TEXT NOT NULL,
        catalog_id INTEGER NOT NULL REFERENCES catalogs(id) ON DELETE CASCADE,
        type TEXT NOT NULL DEFAULT 'Collection',
        title TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        temporal_extent_start TEXT,
        temporal_extent_end TEXT,
        spatial_extent_wkt TEXT NOT NULL,
        srid INTEGER NOT NULL DEFAULT 4326,
        bbox_min_x REAL NOT NULL,
        bbox_min_y REAL NOT NULL,
        bbox_max_x REAL NOT NULL,
        bbox_max_y REAL NOT NULL,
        PRIMARY KEY (id, catalog_id)
    );

    CREATE INDEX IF NOT EXISTS idx_collections_catalog
        ON collections(catalog_id);

    CREATE INDEX IF NOT EXISTS idx_collections_bbox
        ON collections(bbox_min_x, bbox_max_x, bbox_min_y, bbox_max_y);

    CREATE TABLE IF NOT EXISTS stored_search_parameters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        catalog_id INTEGER NOT NULL REFERENCES catalogs(id) ON DELETE CASCADE,
        collection TEXT,
        bbox TEXT,
        datetime TEXT,
        used_search_parameters TEXT NOT NULL UNIQUE
    );

    CREATE INDEX IF NOT EXISTS idx_search_parameters_collection
        ON stored_search_parameters(collection);

    CREATE TABLE IF NOT EXISTS ingestion_status (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_stac_api_url TEXT NOT NULL
            REFERENCES catalogs(url) ON DELETE CASCADE,
        target_stac_api_url TEXT NOT NULL,
        update_flag INTEGER NOT NULL DEFAULT 0,
        state TEXT NOT NULL DEFAULT 'pending',
        time_started TEXT NOT NULL,
        time_finished TEXT,
        error_message TEXT,
        newly_stored_collections TEXT NOT NULL DEFAULT '[]',
        newly_stored_collections_count INTEGER NOT NULL DEFAULT 0,
        updated_collections TEXT NOT NULL DEFAULT '[]',
        updated_collections_count INTEGER NOT NULL DEFAULT 0,
        newly_stored_items_count INTEGER NOT NULL DEFAULT 0,
        updated_items_count INTEGER NOT NULL DEFAULT 0,
        already_stored_items_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_ingestion_status_source
        ON ingestion_status(source_stac_api_url);
"#;

/// Read a timestamp column written with [`crate::stac::temporal::to_storage`]
pub(crate) fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    from_storage(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Nullable variant of [`time_column`]
pub(crate) fn optional_time_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => time_column(row, idx).map(Some),
        None => Ok(None),
    }
}

/// Shared SQLite handle
///
/// Cloning is cheap and every clone refers to the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self::from_connection(conn)?;
        tracing::info!(path = %path.display(), "SQLite database initialized");
        Ok(db)
    }

    /// Create in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::other("SQLite connection mutex poisoned"))
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside a transaction, committed only if `f` returns `Ok`
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
