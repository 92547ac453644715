//! Whole-document JSON persistence
//!
//! Every save writes a sibling temp file, fsyncs it, then renames it over the
//! target. A crash leaves either the old document or the new one.

use crate::storage::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replaces the file at `path` with `bytes`
///
/// # Arguments
///
/// * `path` - Final location of the file
/// * `bytes` - Complete file contents
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path);

    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(&tmp, path)?;

    // Persist the rename itself where the platform allows opening directories
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

/// Serializes `doc` as pretty JSON and writes it atomically
pub(crate) fn save_document<T: Serialize>(path: &Path, doc: &T) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    write_atomic(path, &bytes)?;
    tracing::trace!(path = %path.display(), bytes = bytes.len(), "Saved state document");
    Ok(())
}

/// Loads a JSON document, returning None if the file does not exist
///
/// An empty file is treated as missing. Anything else that fails to parse is
/// reported as corrupt rather than silently replaced.
pub(crate) fn load_document<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if content.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StorageError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Removes a document if it exists
pub(crate) fn remove_document(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
