//! Numbered batch archives of extracted records
//!
//! Records are buffered in memory and written as immutable
//! `batch-NNN.json` files once the buffer is full. Sequence numbers continue
//! from the highest batch already on disk.

use crate::output::traits::{OutputError, OutputResult, Record};
use crate::storage::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An immutable snapshot of extracted records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub sequence_number: u64,
    pub created_at: DateTime<Utc>,
    pub count: usize,
    pub records: Vec<Record>,
}

/// Buffers records and flushes them as numbered batches
pub struct BatchArchiver {
    dir: PathBuf,
    batch_size: usize,
    next_sequence: u64,
    buffer: Vec<Record>,
}

impl BatchArchiver {
    /// Opens the archive directory, continuing after the highest existing batch
    ///
    /// # Arguments
    ///
    /// * `dir` - Batch directory (created if missing)
    /// * `batch_size` - Records per batch; values below 1 are treated as 1
    pub fn open(dir: &Path, batch_size: usize) -> OutputResult<Self> {
        std::fs::create_dir_all(dir)?;

        let last = list_sequences(dir)?.into_iter().max().unwrap_or(0);
        if last > 0 {
            tracing::debug!(dir = %dir.display(), last_batch = last, "Continuing batch numbering");
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            batch_size: batch_size.max(1),
            next_sequence: last + 1,
            buffer: Vec::with_capacity(batch_size.max(1)),
        })
    }

    /// Adds a record, flushing if the buffer is now full
    ///
    /// # Returns
    ///
    /// The sequence number of the flushed batch, if one was written
    pub fn push(&mut self, record: Record) -> OutputResult<Option<u64>> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            return self.flush();
        }
        Ok(None)
    }

    /// Writes any buffered records as a new batch
    ///
    /// Returns `Ok(None)` when the buffer is empty. Once this returns, the
    /// batch is durable.
    pub fn flush(&mut self) -> OutputResult<Option<u64>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let sequence = self.next_sequence;
        let path = batch_path(&self.dir, sequence);
        if path.exists() {
            return Err(OutputError::BatchExists { sequence, path });
        }

        let batch = Batch {
            sequence_number: sequence,
            created_at: Utc::now(),
            count: self.buffer.len(),
            records: std::mem::take(&mut self.buffer),
        };

        let bytes = match serde_json::to_vec_pretty(&batch) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.buffer = batch.records;
                return Err(e.into());
            }
        };
        if let Err(e) = write_atomic(&path, &bytes) {
            self.buffer = batch.records;
            return Err(e.into());
        }

        self.next_sequence += 1;
        tracing::info!("Batch {} saved: {} items", sequence, batch.count);

        Ok(Some(sequence))
    }

    /// Number of records waiting for the next flush
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Sequence number the next flushed batch will get
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Lists the sequence numbers of every batch on disk, ascending
    pub fn list_batches(&self) -> OutputResult<Vec<u64>> {
        let mut sequences = list_sequences(&self.dir)?;
        sequences.sort_unstable();
        Ok(sequences)
    }

    /// Reads one batch back from disk
    pub fn load_batch(&self, sequence: u64) -> OutputResult<Batch> {
        let path = batch_path(&self.dir, sequence);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OutputError::BatchNotFound(sequence))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }
}

/// Path of batch `sequence` inside `dir`
pub fn batch_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("batch-{:03}.json", sequence))
}

/// Counts the batch files in `dir` without creating it
pub fn count_batches(dir: &Path) -> OutputResult<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    Ok(list_sequences(dir)?.len())
}

fn parse_sequence(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix("batch-")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

fn list_sequences(dir: &Path) -> OutputResult<Vec<u64>> {
    let mut sequences = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(seq) = entry.file_name().to_str().and_then(parse_sequence) {
            sequences.push(seq);
        }
    }
    Ok(sequences)
}
