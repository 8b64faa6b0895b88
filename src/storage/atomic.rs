//! Atomic JSON store
//!
//! Reads and writes a whole JSON document per file. Writes go through a
//! temporary file in the target directory followed by an fsync and a
//! rename, so a concurrent reader sees either the full previous content or
//! the full new content, never a torn write.

use std::io::Write;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, error, warn};

/// Errors from the storage layer
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Load a JSON document from a file.
///
/// A missing file and a file that fails to decode both yield an empty
/// object; decode failures are logged. Only unexpected I/O errors (e.g.
/// permission problems) are returned.
pub fn load(path: &Path) -> Result<Value, StorageError> {
    if !path.exists() {
        warn!("JSON file not found: {}, returning empty object", path.display());
        return Ok(Value::Object(Default::default()));
    }

    let content = std::fs::read_to_string(path)?;
    match serde_json::from_str(&content) {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("Failed to decode JSON from {}: {}", path.display(), e);
            Ok(Value::Object(Default::default()))
        }
    }
}

/// Save a JSON document atomically.
///
/// The parent directory is created if missing. Data is written to a
/// temporary file in the same directory, fsynced, and renamed over the
/// target. The temporary file is removed on failure (tempfile drops it).
pub fn atomic_save(path: &Path, value: &Value) -> Result<(), StorageError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::Builder::new()
        .suffix(".tmp")
        .tempfile_in(&dir)?;

    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;

    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
    debug!("Atomically saved data to: {}", path.display());

    Ok(())
}
