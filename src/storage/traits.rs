//! Storage traits and error types
//!
//! This module defines the trait interface for the four persistent stores and
//! the error type shared by every backend.

use crate::storage::{FailureRecord, ProgressCheckpoint, ProgressUpdate, VisitedRecord};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt state document {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable, ordered, duplicate-free sequence of discovered URLs
pub trait FrontierStore {
    /// Returns every frontier URL in insertion order
    fn load_frontier(&self) -> StorageResult<Vec<String>>;

    /// Merges `urls` into the frontier and persists the result
    ///
    /// URLs already present (or repeated within `urls`) are ignored, so the
    /// operation is idempotent.
    ///
    /// # Returns
    ///
    /// The number of URLs that were newly added
    fn append_frontier(&mut self, urls: &[String]) -> StorageResult<usize>;

    /// Returns the number of URLs in the frontier
    fn frontier_len(&self) -> StorageResult<usize>;
}

/// Durable set of URLs that were processed successfully
pub trait VisitedLedger {
    fn is_visited(&self, url: &str) -> StorageResult<bool>;

    /// Durably records `url` as visited
    ///
    /// Marking an already visited URL again is a no-op and keeps the original
    /// timestamp and payload.
    fn mark_visited(&mut self, url: &str, payload: Option<serde_json::Value>)
        -> StorageResult<()>;

    fn load_visited(&self) -> StorageResult<HashSet<String>>;

    fn visited_count(&self) -> StorageResult<usize>;

    /// Gets the full visited record for a URL
    fn get_visited(&self, url: &str) -> StorageResult<Option<VisitedRecord>>;
}

/// Durable map of URL to failure metadata
pub trait FailureLedger {
    /// Records a failed item
    ///
    /// # Arguments
    ///
    /// * `url` - The URL that failed
    /// * `error` - Description of the last error
    /// * `attempts` - Attempts made in this run, added to the stored count
    ///
    /// # Returns
    ///
    /// The updated failure record
    fn mark_failed(&mut self, url: &str, error: &str, attempts: u32)
        -> StorageResult<FailureRecord>;

    /// Returns the number of distinct failed URLs
    fn failure_count(&self) -> StorageResult<usize>;

    fn load_failures(&self) -> StorageResult<Vec<FailureRecord>>;

    fn get_failure(&self, url: &str) -> StorageResult<Option<FailureRecord>>;
}

/// Durable singleton describing where the harvest is
pub trait CheckpointStore {
    /// Loads the checkpoint, or a fresh `initializing` one if none exists
    fn load_checkpoint(&self) -> StorageResult<ProgressCheckpoint>;

    /// Merges a partial update into the persisted checkpoint
    ///
    /// Stamps `updated_at` and returns the merged record.
    fn save_checkpoint(&mut self, update: &ProgressUpdate) -> StorageResult<ProgressCheckpoint>;
}

/// All four stores behind one handle
///
/// The crawl driver is the single writer, so implementations do not need
/// interior locking.
pub trait StateStore: FrontierStore + VisitedLedger + FailureLedger + CheckpointStore + Send {
    /// Empties every store
    fn reset(&mut self) -> StorageResult<()>;

    /// Short name of the backend for log lines
    fn backend_name(&self) -> &'static str;
}
