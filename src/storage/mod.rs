//! Storage module for persisting harvest state
//!
//! This module handles the four durable stores a harvest resumes from:
//! - the frontier of discovered detail URLs
//! - the visited ledger
//! - the failure ledger
//! - the progress checkpoint
//!
//! Two backends implement the same traits. The JSON backend keeps one
//! document per store and rewrites it atomically on every change. The SQLite
//! backend keeps one table per store in a single `state.db`.

mod document;
mod json;
mod schema;
mod sqlite;
mod traits;

pub use document::write_atomic;
pub use json::JsonStateStore;
pub use sqlite::SqliteStateStore;
pub use traits::{
    CheckpointStore, FailureLedger, FrontierStore, StateStore, StorageError, StorageResult,
    VisitedLedger,
};

use crate::config::{Config, StorageBackend};
use crate::state::CrawlPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A URL that was processed successfully
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitedRecord {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub visited_at: DateTime<Utc>,
}

/// Accumulated failure metadata for one URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub url: String,
    pub last_error: String,
    pub attempt_count: u32,
    pub last_attempt_at: DateTime<Utc>,
}

/// The persisted progress checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressCheckpoint {
    pub phase: CrawlPhase,
    /// Last listing page whose URLs reached the frontier (0 = none yet)
    pub current_page: u32,
    pub total_pages: u32,
    pub total_collected: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    /// Phase that was active when the run was interrupted
    pub interrupted_phase: Option<CrawlPhase>,
    pub last_processed_url: Option<String>,
    pub config_hash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ProgressCheckpoint {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            phase: CrawlPhase::Initializing,
            current_page: 0,
            total_pages: 0,
            total_collected: 0,
            total_processed: 0,
            total_failed: 0,
            interrupted_phase: None,
            last_processed_url: None,
            config_hash: None,
            started_at: now,
            updated_at: now,
        }
    }
}

/// A partial checkpoint update; `None` fields keep their persisted value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub phase: Option<CrawlPhase>,
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,
    pub total_collected: Option<u64>,
    pub total_processed: Option<u64>,
    pub total_failed: Option<u64>,
    /// `Some(None)` clears the recorded interrupted phase
    pub interrupted_phase: Option<Option<CrawlPhase>>,
    pub last_processed_url: Option<String>,
    pub config_hash: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl ProgressUpdate {
    /// An update that only moves the phase
    pub fn phase(phase: CrawlPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }

    /// Merges this update into `checkpoint` and stamps `updated_at`
    pub fn apply(&self, checkpoint: &mut ProgressCheckpoint) {
        if let Some(phase) = self.phase {
            checkpoint.phase = phase;
        }
        if let Some(page) = self.current_page {
            checkpoint.current_page = page;
        }
        if let Some(pages) = self.total_pages {
            checkpoint.total_pages = pages;
        }
        if let Some(n) = self.total_collected {
            checkpoint.total_collected = n;
        }
        if let Some(n) = self.total_processed {
            checkpoint.total_processed = n;
        }
        if let Some(n) = self.total_failed {
            checkpoint.total_failed = n;
        }
        if let Some(phase) = self.interrupted_phase {
            checkpoint.interrupted_phase = phase;
        }
        if let Some(url) = &self.last_processed_url {
            checkpoint.last_processed_url = Some(url.clone());
        }
        if let Some(hash) = &self.config_hash {
            checkpoint.config_hash = Some(hash.clone());
        }
        if let Some(started) = self.started_at {
            checkpoint.started_at = started;
        }
        checkpoint.updated_at = Utc::now();
    }
}

/// Opens the state store selected by the configuration
///
/// # Arguments
///
/// * `config` - The harvest configuration (`output.state-dir`, `storage.backend`)
///
/// # Returns
///
/// * `Ok(Box<dyn StateStore>)` - The opened store, read in full
/// * `Err(StorageError)` - The state directory or a document could not be read
pub fn open_state_store(config: &Config) -> StorageResult<Box<dyn StateStore>> {
    open_state_store_at(&config.output.state_dir, config.storage.backend)
}

/// Opens a state store of the given backend in `dir`
pub fn open_state_store_at(dir: &Path, backend: StorageBackend) -> StorageResult<Box<dyn StateStore>> {
    std::fs::create_dir_all(dir)?;

    let store: Box<dyn StateStore> = match backend {
        StorageBackend::Json => Box::new(JsonStateStore::open(dir)?),
        StorageBackend::Sqlite => Box::new(SqliteStateStore::open(&dir.join("state.db"))?),
    };

    tracing::debug!(
        backend = store.backend_name(),
        dir = %dir.display(),
        "Opened state store"
    );

    Ok(store)
}

/// Opens the configured state store only if a previous run left one behind
///
/// Nothing is created on disk. Returns `Ok(None)` when there is no state yet.
pub fn open_existing_state_store(config: &Config) -> StorageResult<Option<Box<dyn StateStore>>> {
    let dir = &config.output.state_dir;
    if !dir.is_dir() {
        return Ok(None);
    }

    let store: Box<dyn StateStore> = match config.storage.backend {
        StorageBackend::Json => Box::new(JsonStateStore::open(dir)?),
        StorageBackend::Sqlite => {
            let path = dir.join("state.db");
            if !path.is_file() {
                return Ok(None);
            }
            Box::new(SqliteStateStore::open_read_only(&path)?)
        }
    };

    Ok(Some(store))
}

/// Computes the URLs that still need extraction, in frontier order
///
/// # Arguments
///
/// * `store` - The state store
/// * `limit` - Keep at most this many URLs
/// * `exclude_exhausted` - If set, also drop URLs whose failure
///   `attempt_count` has reached this value
pub fn compute_unprocessed(
    store: &dyn StateStore,
    limit: Option<usize>,
    exclude_exhausted: Option<u32>,
) -> StorageResult<Vec<String>> {
    let visited = store.load_visited()?;

    let exhausted: std::collections::HashSet<String> = match exclude_exhausted {
        Some(max) => store
            .load_failures()?
            .into_iter()
            .filter(|f| f.attempt_count >= max)
            .map(|f| f.url)
            .collect(),
        None => Default::default(),
    };

    let unprocessed = store
        .load_frontier()?
        .into_iter()
        .filter(|url| !visited.contains(url) && !exhausted.contains(url));

    Ok(match limit {
        Some(n) => unprocessed.take(n).collect(),
        None => unprocessed.collect(),
    })
}
