//! Database schema definitions
//!
//! This module contains the SQL schema for the `state.db` backend. Each store
//! gets one table; the progress checkpoint is a single row with `id = 1`.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Discovered detail URLs in insertion order
CREATE TABLE IF NOT EXISTS frontier (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    added_at TEXT NOT NULL
);

-- URLs processed successfully
CREATE TABLE IF NOT EXISTS visited (
    url TEXT PRIMARY KEY,
    payload TEXT,
    visited_at TEXT NOT NULL
);

-- URLs that exhausted their retries
CREATE TABLE IF NOT EXISTS failures (
    url TEXT PRIMARY KEY,
    last_error TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TEXT NOT NULL
);

-- Progress checkpoint singleton
CREATE TABLE IF NOT EXISTS progress (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    phase TEXT NOT NULL,
    current_page INTEGER NOT NULL DEFAULT 0,
    total_pages INTEGER NOT NULL DEFAULT 0,
    total_collected INTEGER NOT NULL DEFAULT 0,
    total_processed INTEGER NOT NULL DEFAULT 0,
    total_failed INTEGER NOT NULL DEFAULT 0,
    interrupted_phase TEXT,
    last_processed_url TEXT,
    config_hash TEXT,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
