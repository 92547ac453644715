//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the state store
//! traits. All four stores share one `state.db` file.

use crate::state::CrawlPhase;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    CheckpointStore, FailureLedger, FrontierStore, StateStore, StorageResult, VisitedLedger,
};
use crate::storage::{FailureRecord, ProgressCheckpoint, ProgressUpdate, VisitedRecord};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStateStore {
    conn: Connection,
}

impl SqliteStateStore {
    /// Opens or creates the state database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStateStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Every write is a durability point for the harvest
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Opens an existing state database without writing to it
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn phase(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<CrawlPhase>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(CrawlPhase::from_db_string))
}

fn count(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    Ok(raw.max(0) as u64)
}

fn failure_from_row(row: &Row<'_>) -> rusqlite::Result<FailureRecord> {
    Ok(FailureRecord {
        url: row.get(0)?,
        last_error: row.get(1)?,
        attempt_count: row.get(2)?,
        last_attempt_at: timestamp(row, 3)?,
    })
}

impl FrontierStore for SqliteStateStore {
    fn load_frontier(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT url FROM frontier ORDER BY seq")?;
        let urls = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    fn append_frontier(&mut self, urls: &[String]) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut added = 0;

        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO frontier (url, added_at) VALUES (?1, ?2)")?;
            for url in urls {
                added += stmt.execute(params![url, now])?;
            }
        }

        tx.commit()?;
        Ok(added)
    }

    fn frontier_len(&self) -> StorageResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM frontier", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

impl VisitedLedger for SqliteStateStore {
    fn is_visited(&self, url: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM visited WHERE url = ?1", params![url], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_visited(
        &mut self,
        url: &str,
        payload: Option<serde_json::Value>,
    ) -> StorageResult<()> {
        let payload = payload.map(|p| p.to_string());
        self.conn.execute(
            "INSERT OR IGNORE INTO visited (url, payload, visited_at) VALUES (?1, ?2, ?3)",
            params![url, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn load_visited(&self) -> StorageResult<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT url FROM visited")?;
        let urls = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(urls)
    }

    fn visited_count(&self) -> StorageResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM visited", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn get_visited(&self, url: &str) -> StorageResult<Option<VisitedRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT url, payload, visited_at FROM visited WHERE url = ?1",
                params![url],
                |row| {
                    let payload: Option<String> = row.get(1)?;
                    let payload = payload
                        .map(|p| serde_json::from_str(&p))
                        .transpose()
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
                        })?;
                    Ok(VisitedRecord {
                        url: row.get(0)?,
                        payload,
                        visited_at: timestamp(row, 2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

impl FailureLedger for SqliteStateStore {
    fn mark_failed(
        &mut self,
        url: &str,
        error: &str,
        attempts: u32,
    ) -> StorageResult<FailureRecord> {
        self.conn.execute(
            "INSERT INTO failures (url, last_error, attempt_count, last_attempt_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(url) DO UPDATE SET
                attempt_count = attempt_count + excluded.attempt_count,
                last_error = excluded.last_error,
                last_attempt_at = excluded.last_attempt_at",
            params![url, error, attempts, Utc::now().to_rfc3339()],
        )?;

        let record = self.conn.query_row(
            "SELECT url, last_error, attempt_count, last_attempt_at FROM failures WHERE url = ?1",
            params![url],
            failure_from_row,
        )?;
        Ok(record)
    }

    fn failure_count(&self) -> StorageResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM failures", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn load_failures(&self) -> StorageResult<Vec<FailureRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, last_error, attempt_count, last_attempt_at FROM failures ORDER BY rowid",
        )?;
        let records = stmt
            .query_map([], failure_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn get_failure(&self, url: &str) -> StorageResult<Option<FailureRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT url, last_error, attempt_count, last_attempt_at FROM failures WHERE url = ?1",
                params![url],
                failure_from_row,
            )
            .optional()?;
        Ok(record)
    }
}

impl CheckpointStore for SqliteStateStore {
    fn load_checkpoint(&self) -> StorageResult<ProgressCheckpoint> {
        let checkpoint = self
            .conn
            .query_row(
                "SELECT phase, current_page, total_pages, total_collected, total_processed,
                 total_failed, interrupted_phase, last_processed_url, config_hash,
                 started_at, updated_at
                 FROM progress WHERE id = 1",
                [],
                |row| {
                    Ok(ProgressCheckpoint {
                        phase: phase(row, 0)?.unwrap_or(CrawlPhase::Initializing),
                        current_page: row.get(1)?,
                        total_pages: row.get(2)?,
                        total_collected: count(row, 3)?,
                        total_processed: count(row, 4)?,
                        total_failed: count(row, 5)?,
                        interrupted_phase: phase(row, 6)?,
                        last_processed_url: row.get(7)?,
                        config_hash: row.get(8)?,
                        started_at: timestamp(row, 9)?,
                        updated_at: timestamp(row, 10)?,
                    })
                },
            )
            .optional()?;

        Ok(checkpoint.unwrap_or_default())
    }

    fn save_checkpoint(&mut self, update: &ProgressUpdate) -> StorageResult<ProgressCheckpoint> {
        let mut checkpoint = self.load_checkpoint()?;
        update.apply(&mut checkpoint);

        self.conn.execute(
            "INSERT OR REPLACE INTO progress (
                id, phase, current_page, total_pages, total_collected, total_processed,
                total_failed, interrupted_phase, last_processed_url, config_hash,
                started_at, updated_at
             ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                checkpoint.phase.to_db_string(),
                checkpoint.current_page,
                checkpoint.total_pages,
                checkpoint.total_collected as i64,
                checkpoint.total_processed as i64,
                checkpoint.total_failed as i64,
                checkpoint.interrupted_phase.map(|p| p.to_db_string()),
                checkpoint.last_processed_url,
                checkpoint.config_hash,
                checkpoint.started_at.to_rfc3339(),
                checkpoint.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(checkpoint)
    }
}

impl StateStore for SqliteStateStore {
    fn reset(&mut self) -> StorageResult<()> {
        self.conn.execute_batch(
            "
            BEGIN;
            DELETE FROM frontier;
            DELETE FROM visited;
            DELETE FROM failures;
            DELETE FROM progress;
            COMMIT;
        ",
        )?;
        tracing::info!("State cleared");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
