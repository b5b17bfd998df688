//! Out-of-band payload store
//!
//! Bodies too large or too structured for the single-line `body` field
//! are parked under `blobs/<id>.json` and referenced by `body_ref`; the
//! router treats the blob as opaque.

use serde_json::Value;
use std::path::PathBuf;

use super::jsonio::{StorageError, read_json, write_json_atomic};
use super::layout::StorageLayout;

/// Writes a blob payload, returning the path it landed at.
///
/// # Errors
///
/// Returns an error when the blob cannot be written.
pub fn write_blob(
    layout: &StorageLayout,
    blob_id: &str,
    payload: &Value,
) -> Result<PathBuf, StorageError> {
    let path = layout.blob_path(blob_id);
    write_json_atomic(&path, payload)?;
    Ok(path)
}

/// Reads a blob payload, `None` when absent.
///
/// # Errors
///
/// Returns an error when the blob exists but cannot be read.
pub fn read_blob(layout: &StorageLayout, blob_id: &str) -> Result<Option<Value>, StorageError> {
    read_json(&layout.blob_path(blob_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blob_round_trips_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        layout.ensure().unwrap();

        let payload = json!({"report": "long form text", "sections": ["a", "b"]});
        let path = write_blob(&layout, "sess-1-4", &payload).unwrap();
        assert!(path.ends_with("blobs/sess-1-4.json"));
        assert_eq!(read_blob(&layout, "sess-1-4").unwrap(), Some(payload));
        assert_eq!(read_blob(&layout, "sess-1-5").unwrap(), None);
    }
}
