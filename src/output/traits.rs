//! Output sink traits and types
//!
//! This module defines the extracted record type, the trait interface for
//! incremental record sinks, and the error type shared by the sinks and the
//! batch archiver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Batch {sequence} already exists at {path}")]
    BatchExists { sequence: u64, path: PathBuf },

    #[error("Batch {0} not found")]
    BatchNotFound(u64),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// One record extracted from a detail page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// The detail URL the record came from
    pub url: String,

    /// Extracted field values by field name
    pub fields: BTreeMap<String, String>,

    pub extracted_at: DateTime<Utc>,
}

impl Record {
    /// Creates a record stamped with the current time
    pub fn new(url: impl Into<String>, fields: BTreeMap<String, String>) -> Self {
        Self {
            url: url.into(),
            fields,
            extracted_at: Utc::now(),
        }
    }

    /// Returns a field value, treating empty strings as missing
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// The payload stored in the visited ledger when auditing is enabled
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!(self.fields)
    }
}

/// Trait for incremental record sinks
///
/// A sink receives each record exactly when it is extracted. `append` must
/// not return until the row is durable, because the caller marks the URL as
/// visited right after.
pub trait RecordSink: Send {
    /// Appends one record
    ///
    /// # Arguments
    ///
    /// * `record` - The extracted record
    fn append(&mut self, record: &Record) -> OutputResult<()>;

    /// Number of rows written through this sink since it was opened
    fn rows_written(&self) -> u64;
}
