//! Workspace session identity
//!
//! Created on first use of a workspace and immutable afterwards; the
//! session id prefixes every message id minted by the router.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::jsonio::{StorageError, read_json, write_json_atomic};
use super::layout::StorageLayout;

/// Contents of `meta/session.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: u64,
    pub workspace: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Loads the workspace session, creating it on first use.
///
/// An existing file wins unconditionally; `roles` only matter when the
/// session is being created.
///
/// # Errors
///
/// Returns an error when the session file cannot be read or written.
pub fn init_or_load_session(
    layout: &StorageLayout,
    workspace: &str,
    roles: &[String],
    now_ms: u64,
) -> Result<Session, StorageError> {
    layout.ensure()?;
    let path = layout.session_path();
    if let Some(existing) = read_json(&path)? {
        return Ok(serde_json::from_value(existing)?);
    }

    let session = Session {
        session_id: Uuid::new_v4().to_string(),
        created_at: now_ms,
        workspace: workspace.to_string(),
        roles: roles.to_vec(),
    };
    write_json_atomic(&path, &session)?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_is_created_once_and_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        let roles = vec!["MAIN".to_string(), "A".to_string()];

        let first = init_or_load_session(&layout, "ws", &roles, 1_000).unwrap();
        assert!(!first.session_id.is_empty());
        assert_eq!(first.created_at, 1_000);
        assert_eq!(first.roles, roles);

        let second = init_or_load_session(&layout, "elsewhere", &[], 9_999).unwrap();
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.created_at, 1_000);
        assert_eq!(second.roles, roles);
    }
}
