//! File helpers shared by the pipeline: atomic writes and JSON document loads.
//!
//! Every artifact is written to a `.tmp` sibling first and renamed into
//! place, so a reader never sees a half-written card or report.

use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{CardError, Result};

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically write raw bytes to a file.
///
/// Creates parent directories if they don't exist.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, data)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Atomically write a JSON value, pretty-printed.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    atomic_write(path, json.as_bytes())?;
    Ok(())
}

/// Read a JSON document from disk.
///
/// Malformed JSON is reported as [`CardError::InvalidDocument`] naming the file.
pub fn read_document(path: &Path) -> Result<Value> {
    let data = std::fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|e| {
        CardError::invalid_document(format!("{} is not valid JSON: {}", path.display(), e))
    })
}

/// Load and deserialize JSON from a file, `Ok(None)` if it doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}
