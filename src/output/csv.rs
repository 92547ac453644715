//! Append-only CSV record sink
//!
//! Columns are the configured field names followed by `url`. The header is
//! written only when the file is empty, so a resumed harvest keeps appending
//! to the same file.

use crate::output::traits::{OutputResult, Record, RecordSink};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// CSV file sink
pub struct CsvSink {
    path: PathBuf,
    file: File,
    columns: Vec<String>,
    rows_written: u64,
}

impl CsvSink {
    /// Opens (or creates) the CSV file at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the CSV file
    /// * `columns` - Field names, in column order
    pub fn open(path: &Path, columns: Vec<String>) -> OutputResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let header = header_line(&columns);

        if file.metadata()?.len() == 0 {
            file.write_all(header.as_bytes())?;
            file.sync_data()?;
            tracing::debug!(path = %path.display(), "Wrote CSV header");
        } else {
            let existing = first_line(path)?;
            if existing.trim_end() != header.trim_end() {
                tracing::warn!(
                    path = %path.display(),
                    "Existing CSV header does not match the configured fields; appending anyway"
                );
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            columns,
            rows_written: 0,
        })
    }

    /// Returns the CSV file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn row_line(&self, record: &Record) -> String {
        let mut cells: Vec<String> = self
            .columns
            .iter()
            .map(|c| escape_csv(record.fields.get(c).map(String::as_str).unwrap_or("")))
            .collect();
        cells.push(escape_csv(&record.url));

        let mut line = cells.join(",");
        line.push('\n');
        line
    }
}

impl RecordSink for CsvSink {
    fn append(&mut self, record: &Record) -> OutputResult<()> {
        let line = self.row_line(record);
        self.file.write_all(line.as_bytes())?;
        self.file.sync_data()?;
        self.rows_written += 1;
        Ok(())
    }

    fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

fn header_line(columns: &[String]) -> String {
    let mut cells: Vec<String> = columns.iter().map(|c| escape_csv(c)).collect();
    cells.push("url".to_string());

    let mut line = cells.join(",");
    line.push('\n');
    line
}

fn first_line(path: &Path) -> OutputResult<String> {
    let mut line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut line)?;
    Ok(line)
}

/// Quotes a CSV cell if it contains a delimiter, quote or line break
pub fn escape_csv(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
