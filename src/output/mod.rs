//! Output module for extracted records
//!
//! This module handles:
//! - Appending each extracted record to the CSV sink as it arrives
//! - Archiving records in numbered, immutable JSON batches
//! - Reporting state-directory statistics

mod archive;
mod csv;
pub mod stats;
mod traits;

pub use archive::{batch_path, count_batches, Batch, BatchArchiver};
pub use csv::{escape_csv, CsvSink};
pub use stats::{load_state_statistics, load_statistics, print_statistics, StateStatistics};
pub use traits::{OutputError, OutputResult, Record, RecordSink};
