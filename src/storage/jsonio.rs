//! Atomic JSON state files and append-only JSON-lines logs
//!
//! State files are rewritten with a write-temp-then-rename discipline:
//! serialize to a sibling temp file, flush + fsync, then atomically
//! replace, so readers never observe a torn snapshot. Logs are appended
//! one complete JSON object per line; reads tolerate blank lines and a
//! truncated trailing line by skipping them.

use serde::Serialize;
use serde_json::Value;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors from the durable storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

/// Reads a JSON file, `None` when it does not exist.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn read_json(path: &Path) -> Result<Option<Value>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Atomically replaces `path` with the serialized payload.
///
/// The temp file lives in the same directory so the final rename stays
/// on one filesystem.
///
/// # Errors
///
/// Returns an error when serialization or any filesystem step fails;
/// on failure the previous file contents are untouched.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, payload: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec(payload)?;
    let tmp_path = temp_sibling(path);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&data)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Appends one record as a single JSON line.
///
/// # Errors
///
/// Returns an error when serialization or the append fails.
pub fn append_jsonl<T: Serialize + ?Sized>(path: &Path, record: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    file.write_all(&line)?;
    file.flush()?;
    Ok(())
}

/// Iterates the records of a JSON-lines file.
///
/// A missing file yields nothing. Blank lines and lines that fail to
/// parse (a torn trailing write) are skipped.
#[must_use]
pub fn iter_jsonl(path: &Path) -> JsonlIter {
    let lines = File::open(path).ok().map(|file| BufReader::new(file).lines());
    JsonlIter {
        path: path.to_path_buf(),
        lines,
    }
}

/// Tolerant iterator over a JSON-lines file.
pub struct JsonlIter {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
}

impl Iterator for JsonlIter {
    type Item = Value;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next_line = self.lines.as_mut()?.next();
            let line = match next_line? {
                Ok(line) => line,
                Err(read_err) => {
                    warn!(path = %self.path.display(), error = %read_err, "stopping jsonl read");
                    self.lines = None;
                    return None;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(value) => return Some(value),
                Err(_) => {
                    warn!(path = %self.path.display(), "skipping unparseable jsonl line");
                }
            }
        }
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
