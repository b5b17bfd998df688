//! Directory scheme under the workspace root
//!
//! All router files live under `<workspace>/.codex_team/`:
//! `meta/` (session identity), `state/` (rewritten snapshots),
//! `inbox/` (per-agent event logs), `logs/` (epoch-segmented message
//! and ack logs plus the failure log), `blobs/` (out-of-band bodies).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Root directory name inside a workspace.
pub const STORAGE_DIR_NAME: &str = ".codex_team";

/// Path scheme for a single workspace's router storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Layout rooted at `<workspace>/.codex_team`.
    #[must_use]
    pub fn for_workspace(workspace: &Path) -> Self {
        Self {
            root: workspace.join(STORAGE_DIR_NAME),
        }
    }

    /// Storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates every directory in the scheme.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when a directory cannot be
    /// created.
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [
            self.meta_dir(),
            self.state_dir(),
            self.inbox_dir(),
            self.logs_dir(),
            self.blobs_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// `meta/` directory.
    #[must_use]
    pub fn meta_dir(&self) -> PathBuf {
        self.root.join("meta")
    }

    /// `state/` directory.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    /// `inbox/` directory.
    #[must_use]
    pub fn inbox_dir(&self) -> PathBuf {
        self.root.join("inbox")
    }

    /// `logs/` directory.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// `blobs/` directory.
    #[must_use]
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    /// `meta/session.json`.
    #[must_use]
    pub fn session_path(&self) -> PathBuf {
        self.meta_dir().join("session.json")
    }

    /// `state/router.json`.
    #[must_use]
    pub fn router_state_path(&self) -> PathBuf {
        self.state_dir().join("router.json")
    }

    /// `state/tasks.json`.
    #[must_use]
    pub fn tasks_path(&self) -> PathBuf {
        self.state_dir().join("tasks.json")
    }

    /// `inbox/<agent>.jsonl`.
    #[must_use]
    pub fn inbox_path(&self, agent: &str) -> PathBuf {
        self.inbox_dir().join(format!("{agent}.jsonl"))
    }

    /// `logs/messages-<epoch>.jsonl`.
    #[must_use]
    pub fn messages_log_path(&self, epoch: u64) -> PathBuf {
        self.logs_dir().join(format!("messages-{epoch}.jsonl"))
    }

    /// `logs/acks-<epoch>.jsonl`.
    #[must_use]
    pub fn acks_log_path(&self, epoch: u64) -> PathBuf {
        self.logs_dir().join(format!("acks-{epoch}.jsonl"))
    }

    /// `logs/failures.log`.
    #[must_use]
    pub fn failures_log_path(&self) -> PathBuf {
        self.logs_dir().join("failures.log")
    }

    /// `blobs/<id>.json`.
    #[must_use]
    pub fn blob_path(&self, blob_id: &str) -> PathBuf {
        self.blobs_dir().join(format!("{blob_id}.json"))
    }
}
