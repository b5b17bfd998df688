//! Monotonic router counters
//!
//! `epoch` increments once per process start and segments the logs;
//! `last_seq` only ever grows within a workspace, across epochs.

use serde::{Deserialize, Serialize};

use crate::storage::{StorageError, StorageLayout, read_json, write_json_atomic};

/// Contents of `state/router.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterState {
    pub epoch: u64,
    pub last_seq: u64,
    pub last_ts: Option<u64>,
}

impl RouterState {
    /// State of a workspace that has never routed a message.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            epoch: 0,
            last_seq: 0,
            last_ts: None,
        }
    }

    /// Next state after assigning one sequence number at `ts_ms`.
    #[must_use]
    pub fn advance_seq(self, ts_ms: u64) -> Self {
        Self {
            epoch: self.epoch,
            last_seq: self.last_seq + 1,
            last_ts: Some(ts_ms),
        }
    }

    /// Next state after a process (re)start.
    #[must_use]
    pub fn increment_epoch(self) -> Self {
        Self {
            epoch: self.epoch + 1,
            last_seq: self.last_seq,
            last_ts: self.last_ts,
        }
    }
}

/// Loads `state/router.json`, falling back to the initial state.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_router_state(layout: &StorageLayout) -> Result<RouterState, StorageError> {
    match read_json(&layout.router_state_path())? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(RouterState::initial()),
    }
}

/// Atomically persists `state/router.json`.
///
/// # Errors
///
/// Returns an error when the rewrite fails.
pub fn save_router_state(layout: &StorageLayout, state: &RouterState) -> Result<(), StorageError> {
    write_json_atomic(&layout.router_state_path(), state)
}
