//! JSON document storage backend
//!
//! Each store lives in its own document under the state directory:
//! `frontier.json`, `visited.json`, `failed.json` and `progress.json`. The
//! documents are read in full on open and mirrored in memory; every mutation
//! rewrites the affected document atomically before returning.

use crate::storage::document::{load_document, remove_document, save_document};
use crate::storage::traits::{
    CheckpointStore, FailureLedger, FrontierStore, StateStore, StorageResult, VisitedLedger,
};
use crate::storage::{FailureRecord, ProgressCheckpoint, ProgressUpdate, VisitedRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

const FRONTIER_FILE: &str = "frontier.json";
const VISITED_FILE: &str = "visited.json";
const FAILED_FILE: &str = "failed.json";
const PROGRESS_FILE: &str = "progress.json";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct FrontierDocument {
    urls: Vec<String>,
    total_count: usize,
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct VisitedDocument {
    entries: Vec<VisitedRecord>,
    count: usize,
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct FailedDocument {
    entries: Vec<FailureRecord>,
    count: usize,
    last_updated: Option<DateTime<Utc>>,
}

/// JSON-document implementation of [`StateStore`]
pub struct JsonStateStore {
    dir: PathBuf,
    frontier: Vec<String>,
    frontier_index: HashSet<String>,
    visited: Vec<VisitedRecord>,
    visited_index: HashMap<String, usize>,
    failures: Vec<FailureRecord>,
    failure_index: HashMap<String, usize>,
    checkpoint: Option<ProgressCheckpoint>,
}

impl JsonStateStore {
    /// Opens the store in `dir`, reading every existing document
    ///
    /// # Arguments
    ///
    /// * `dir` - The state directory (created if missing)
    ///
    /// # Returns
    ///
    /// * `Ok(JsonStateStore)` - All documents loaded
    /// * `Err(StorageError)` - A document could not be read or is corrupt
    pub fn open(dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(dir)?;

        let frontier_doc: FrontierDocument =
            load_document(&dir.join(FRONTIER_FILE))?.unwrap_or_default();
        let visited_doc: VisitedDocument =
            load_document(&dir.join(VISITED_FILE))?.unwrap_or_default();
        let failed_doc: FailedDocument = load_document(&dir.join(FAILED_FILE))?.unwrap_or_default();
        let checkpoint: Option<ProgressCheckpoint> = load_document(&dir.join(PROGRESS_FILE))?;

        let mut store = Self {
            dir: dir.to_path_buf(),
            frontier: Vec::new(),
            frontier_index: HashSet::new(),
            visited: Vec::new(),
            visited_index: HashMap::new(),
            failures: Vec::new(),
            failure_index: HashMap::new(),
            checkpoint,
        };

        // Rebuild the indexes, dropping any duplicates a hand-edited file may hold
        for url in frontier_doc.urls {
            if store.frontier_index.insert(url.clone()) {
                store.frontier.push(url);
            }
        }
        for record in visited_doc.entries {
            if !store.visited_index.contains_key(&record.url) {
                store
                    .visited_index
                    .insert(record.url.clone(), store.visited.len());
                store.visited.push(record);
            }
        }
        for record in failed_doc.entries {
            if !store.failure_index.contains_key(&record.url) {
                store
                    .failure_index
                    .insert(record.url.clone(), store.failures.len());
                store.failures.push(record);
            }
        }

        tracing::debug!(
            frontier = store.frontier.len(),
            visited = store.visited.len(),
            failed = store.failures.len(),
            "Loaded JSON state documents"
        );

        Ok(store)
    }

    /// Returns the state directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn save_frontier(&self) -> StorageResult<()> {
        let doc = FrontierDocument {
            urls: self.frontier.clone(),
            total_count: self.frontier.len(),
            last_updated: Some(Utc::now()),
        };
        save_document(&self.dir.join(FRONTIER_FILE), &doc)
    }

    fn save_visited(&self) -> StorageResult<()> {
        let doc = VisitedDocument {
            entries: self.visited.clone(),
            count: self.visited.len(),
            last_updated: Some(Utc::now()),
        };
        save_document(&self.dir.join(VISITED_FILE), &doc)
    }

    fn save_failures(&self) -> StorageResult<()> {
        let doc = FailedDocument {
            entries: self.failures.clone(),
            count: self.failures.len(),
            last_updated: Some(Utc::now()),
        };
        save_document(&self.dir.join(FAILED_FILE), &doc)
    }
}

impl FrontierStore for JsonStateStore {
    fn load_frontier(&self) -> StorageResult<Vec<String>> {
        Ok(self.frontier.clone())
    }

    fn append_frontier(&mut self, urls: &[String]) -> StorageResult<usize> {
        let mut added = 0;
        for url in urls {
            if self.frontier_index.insert(url.clone()) {
                self.frontier.push(url.clone());
                added += 1;
            }
        }

        if added > 0 {
            self.save_frontier()?;
        }

        Ok(added)
    }

    fn frontier_len(&self) -> StorageResult<usize> {
        Ok(self.frontier.len())
    }
}

impl VisitedLedger for JsonStateStore {
    fn is_visited(&self, url: &str) -> StorageResult<bool> {
        Ok(self.visited_index.contains_key(url))
    }

    fn mark_visited(
        &mut self,
        url: &str,
        payload: Option<serde_json::Value>,
    ) -> StorageResult<()> {
        if self.visited_index.contains_key(url) {
            return Ok(());
        }

        self.visited_index.insert(url.to_string(), self.visited.len());
        self.visited.push(VisitedRecord {
            url: url.to_string(),
            payload,
            visited_at: Utc::now(),
        });

        self.save_visited()
    }

    fn load_visited(&self) -> StorageResult<HashSet<String>> {
        Ok(self.visited_index.keys().cloned().collect())
    }

    fn visited_count(&self) -> StorageResult<usize> {
        Ok(self.visited.len())
    }

    fn get_visited(&self, url: &str) -> StorageResult<Option<VisitedRecord>> {
        Ok(self
            .visited_index
            .get(url)
            .map(|&i| self.visited[i].clone()))
    }
}

impl FailureLedger for JsonStateStore {
    fn mark_failed(
        &mut self,
        url: &str,
        error: &str,
        attempts: u32,
    ) -> StorageResult<FailureRecord> {
        let now = Utc::now();

        let record = match self.failure_index.get(url) {
            Some(&i) => {
                let existing = &mut self.failures[i];
                existing.attempt_count = existing.attempt_count.saturating_add(attempts);
                existing.last_error = error.to_string();
                existing.last_attempt_at = now;
                existing.clone()
            }
            None => {
                let record = FailureRecord {
                    url: url.to_string(),
                    last_error: error.to_string(),
                    attempt_count: attempts,
                    last_attempt_at: now,
                };
                self.failure_index.insert(url.to_string(), self.failures.len());
                self.failures.push(record.clone());
                record
            }
        };

        self.save_failures()?;
        Ok(record)
    }

    fn failure_count(&self) -> StorageResult<usize> {
        Ok(self.failures.len())
    }

    fn load_failures(&self) -> StorageResult<Vec<FailureRecord>> {
        Ok(self.failures.clone())
    }

    fn get_failure(&self, url: &str) -> StorageResult<Option<FailureRecord>> {
        Ok(self
            .failure_index
            .get(url)
            .map(|&i| self.failures[i].clone()))
    }
}

impl CheckpointStore for JsonStateStore {
    fn load_checkpoint(&self) -> StorageResult<ProgressCheckpoint> {
        Ok(self.checkpoint.clone().unwrap_or_default())
    }

    fn save_checkpoint(&mut self, update: &ProgressUpdate) -> StorageResult<ProgressCheckpoint> {
        let mut checkpoint = self.checkpoint.clone().unwrap_or_default();
        update.apply(&mut checkpoint);

        save_document(&self.dir.join(PROGRESS_FILE), &checkpoint)?;
        self.checkpoint = Some(checkpoint.clone());

        Ok(checkpoint)
    }
}

impl StateStore for JsonStateStore {
    fn reset(&mut self) -> StorageResult<()> {
        for file in [FRONTIER_FILE, VISITED_FILE, FAILED_FILE, PROGRESS_FILE] {
            remove_document(&self.dir.join(file))?;
        }

        self.frontier.clear();
        self.frontier_index.clear();
        self.visited.clear();
        self.visited_index.clear();
        self.failures.clear();
        self.failure_index.clear();
        self.checkpoint = None;

        tracing::info!(dir = %self.dir.display(), "State cleared");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "json"
    }
}
