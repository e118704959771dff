//! Ingestion job status tracking
//!
//! ```text
//!            ┌──> COMPLETED
//! PENDING ───┤
//!            └──> FAILED
//! ```
//!
//! Both terminal states are final. A transition is a conditional
//! `UPDATE ... WHERE state = 'pending'`, so when the dispatcher's background
//! task and the microservice's HTTP callback race, exactly one wins and the
//! other observes [`TransitionOutcome::AlreadyTerminal`]. All handoff goes
//! through the persisted row; nothing is shared in memory with the
//! dispatching call.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::models::{IngestionCounters, IngestionState, IngestionStatus};
use crate::stac::client::normalize_catalog_url;
use crate::stac::temporal::to_storage;
use crate::storage::{optional_time_column, time_column, Database};

const COLUMNS: &str = "id, source_stac_api_url, target_stac_api_url, update_flag, state,
    time_started, time_finished, error_message,
    newly_stored_collections, newly_stored_collections_count,
    updated_collections, updated_collections_count,
    newly_stored_items_count, updated_items_count, already_stored_items_count";

fn json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn status_from_row(row: &Row<'_>) -> rusqlite::Result<IngestionStatus> {
    let state: String = row.get(4)?;
    let state = state.parse::<IngestionState>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(IngestionStatus {
        id: row.get(0)?,
        source_stac_api_url: row.get(1)?,
        target_stac_api_url: row.get(2)?,
        update: row.get(3)?,
        state,
        time_started: time_column(row, 5)?,
        time_finished: optional_time_column(row, 6)?,
        error_message: row.get(7)?,
        counters: IngestionCounters {
            newly_stored_collections: json_list(row, 8)?,
            newly_stored_collections_count: row.get(9)?,
            updated_collections: json_list(row, 10)?,
            updated_collections_count: row.get(11)?,
            newly_stored_items_count: row.get(12)?,
            updated_items_count: row.get(13)?,
            already_stored_items_count: row.get(14)?,
        },
    })
}

/// Result of a terminal transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The row was pending and now carries the new state
    Applied(IngestionStatus),
    /// The row was already terminal and is returned unchanged
    AlreadyTerminal(IngestionStatus),
}

impl TransitionOutcome {
    pub fn status(&self) -> &IngestionStatus {
        match self {
            Self::Applied(s) | Self::AlreadyTerminal(s) => s,
        }
    }

    pub fn into_status(self) -> IngestionStatus {
        match self {
            Self::Applied(s) | Self::AlreadyTerminal(s) => s,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::AlreadyTerminal(_) => "already_terminal",
        }
    }
}

/// Owner of the ingestion status rows
#[derive(Clone)]
pub struct IngestionStatusTracker {
    db: Database,
}

impl IngestionStatusTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a PENDING row and return its id (the job handle)
    ///
    /// `source` must be the URL of a registered catalog.
    pub fn create(&self, source: &str, target: &str, update: bool) -> Result<i64> {
        let source = normalize_catalog_url(source);
        let now = to_storage(&Utc::now());

        let id = self.db.with_conn(|conn| {
            let known: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM catalogs WHERE url = ?1)",
                params![source],
                |row| row.get(0),
            )?;
            if !known {
                return Err(Error::CatalogDoesNotExist(source.clone()));
            }

            conn.execute(
                r#"
                    INSERT INTO ingestion_status
                        (source_stac_api_url, target_stac_api_url, update_flag, state, time_started)
                    VALUES (?1, ?2, ?3, 'pending', ?4)
                    "#,
                params![source, target, update, now],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        tracing::info!(status_id = id, source = %source, target = %target, update, "Ingestion status created");
        Ok(id)
    }

    /// Mark a pending job COMPLETED with the reported counters
    pub fn complete(&self, id: i64, counters: &IngestionCounters) -> Result<TransitionOutcome> {
        let now = to_storage(&Utc::now());
        let newly = serde_json::to_string(&counters.newly_stored_collections)?;
        let updated = serde_json::to_string(&counters.updated_collections)?;

        let outcome = self.transition(id, |conn| {
            Ok(conn.execute(
                r#"
                    UPDATE ingestion_status SET
                        state = 'completed',
                        time_finished = ?2,
                        newly_stored_collections = ?3,
                        newly_stored_collections_count = ?4,
                        updated_collections = ?5,
                        updated_collections_count = ?6,
                        newly_stored_items_count = ?7,
                        updated_items_count = ?8,
                        already_stored_items_count = ?9
                    WHERE id = ?1 AND state = 'pending'
                    "#,
                params![
                    id,
                    now,
                    newly,
                    counters.newly_stored_collections_count,
                    updated,
                    counters.updated_collections_count,
                    counters.newly_stored_items_count,
                    counters.updated_items_count,
                    counters.already_stored_items_count,
                ],
            )?)
        })?;

        crate::metrics::record_status_transition(IngestionState::Completed, outcome.label());
        Ok(outcome)
    }

    /// Mark a pending job FAILED with `message`
    pub fn fail(&self, id: i64, message: &str) -> Result<TransitionOutcome> {
        let now = to_storage(&Utc::now());

        let outcome = self.transition(id, |conn| {
            Ok(conn.execute(
                r#"
                    UPDATE ingestion_status SET
                        state = 'failed',
                        time_finished = ?2,
                        error_message = ?3
                    WHERE id = ?1 AND state = 'pending'
                    "#,
                params![id, now, message],
            )?)
        })?;

        crate::metrics::record_status_transition(IngestionState::Failed, outcome.label());
        Ok(outcome)
    }

    fn transition(
        &self,
        id: i64,
        update: impl FnOnce(&Connection) -> Result<usize>,
    ) -> Result<TransitionOutcome> {
        let (changed, status) = self.db.transaction(|tx| {
            let changed = update(&**tx)?;
            let status = Self::find(tx, id)?.ok_or(Error::StatusNotFound(id))?;
            Ok((changed, status))
        })?;

        if changed == 1 {
            tracing::info!(status_id = id, state = %status.state, "Ingestion status transitioned");
            Ok(TransitionOutcome::Applied(status))
        } else {
            tracing::debug!(status_id = id, state = %status.state, "Ignoring transition of terminal status");
            Ok(TransitionOutcome::AlreadyTerminal(status))
        }
    }

    fn find(conn: &Connection, id: i64) -> Result<Option<IngestionStatus>> {
        let sql = format!("SELECT {COLUMNS} FROM ingestion_status WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], status_from_row).optional()?)
    }

    /// Get status by id
    pub fn get(&self, id: i64) -> Result<IngestionStatus> {
        self.db
            .with_conn(|conn| Self::find(conn, id))?
            .ok_or(Error::StatusNotFound(id))
    }

    /// All statuses, newest first
    pub fn list(&self) -> Result<Vec<IngestionStatus>> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {COLUMNS} FROM ingestion_status ORDER BY id DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], status_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Delete a status row
    ///
    /// Allowed in any state. Deleting a pending row stops tracking the job;
    /// the remote microservice is not notified.
    pub fn remove(&self, id: i64) -> Result<IngestionStatus> {
        let status = self.db.transaction(|tx| {
            let status = Self::find(tx, id)?.ok_or(Error::StatusNotFound(id))?;
            tx.execute("DELETE FROM ingestion_status WHERE id = ?1", params![id])?;
            Ok(status)
        })?;
        tracing::info!(status_id = id, state = %status.state, "Ingestion status removed");
        Ok(status)
    }
}
