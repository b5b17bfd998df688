//! Task lifecycle projection
//!
//! Tasks are never created directly; their state is a projection of the
//! message stream. A message carrying `task_id` plus a status-mapping
//! action upserts the task entry, and `done`/`fail` typed messages
//! project their type when no action is present.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::protocol::types::{ActionType, Message, MessageType};
use crate::storage::{StorageError, StorageLayout, read_json, write_json_atomic};

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Done,
    Failed,
    VerifyPending,
    Verified,
}

/// Aggregated state of one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// Last assigner, or the recipient list when no owner was named.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<u64>,
    #[serde(default)]
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_seq: Option<u64>,
}

/// All tasks in a workspace, keyed by task id.
pub type TaskMap = BTreeMap<String, TaskRecord>;

/// Applies one message to the task map; no-op unless the message
/// carries a `task_id` and projects a status.
pub fn apply_message_to_tasks(tasks: &mut TaskMap, message: &Message) {
    let Some(task_id) = message.task_id.as_deref() else {
        return;
    };
    let Some(status) = status_for_message(message) else {
        return;
    };

    let entry = tasks.entry(task_id.to_string()).or_default();
    entry.status = Some(status);
    entry.owner = Some(message.owner.clone().unwrap_or_else(|| {
        Value::Array(message.to.iter().cloned().map(Value::String).collect())
    }));
    if message.deadline.is_some() {
        entry.deadline = message.deadline;
    }
    entry.last_update_seq = Some(message.seq);
}

/// Status projected by a message, if any.
///
/// Actions win; a `done`/`fail` typed message with no action projects
/// its type.
#[must_use]
pub fn status_for_message(message: &Message) -> Option<TaskStatus> {
    match message.action {
        Some(ActionType::Assign) => Some(TaskStatus::Open),
        Some(ActionType::Verify) => Some(TaskStatus::VerifyPending),
        Some(ActionType::Verified) => Some(TaskStatus::Verified),
        Some(_) => None,
        None => match message.kind {
            MessageType::Done => Some(TaskStatus::Done),
            MessageType::Fail => Some(TaskStatus::Failed),
            _ => None,
        },
    }
}

/// Loads `state/tasks.json`, empty when absent.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_tasks(layout: &StorageLayout) -> Result<TaskMap, StorageError> {
    match read_json(&layout.tasks_path())? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(TaskMap::new()),
    }
}

/// Atomically persists `state/tasks.json`.
///
/// # Errors
///
/// Returns an error when the rewrite fails.
pub fn save_tasks(layout: &StorageLayout, tasks: &TaskMap) -> Result<(), StorageError> {
    write_json_atomic(&layout.tasks_path(), tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(kind: &str, action: Option<&str>, task_id: Option<&str>, seq: u64) -> Message {
        let mut raw = json!({
            "v": "1",
            "session": "sess",
            "epoch": 1,
            "seq": seq,
            "id": format!("sess-1-{seq}"),
            "ts": 1_000,
            "agent_instance": "MAIN-01",
            "from": "MAIN",
            "to": ["A"],
            "type": kind
        });
        if let Some(action) = action {
            raw["action"] = json!(action);
        }
        if let Some(task_id) = task_id {
            raw["task_id"] = json!(task_id);
        }
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn assign_opens_a_task_with_recipients_as_fallback_owner() {
        let mut tasks = TaskMap::new();
        apply_message_to_tasks(&mut tasks, &message("ask", Some("assign"), Some("T-1"), 1));
        let record = tasks.get("T-1").unwrap();
        assert_eq!(record.status, Some(TaskStatus::Open));
        assert_eq!(record.owner, Some(json!(["A"])));
        assert_eq!(record.last_update_seq, Some(1));
    }

    #[test]
    fn done_and_fail_types_project_without_an_action() {
        let mut tasks = TaskMap::new();
        apply_message_to_tasks(&mut tasks, &message("ask", Some("assign"), Some("T-1"), 1));
        apply_message_to_tasks(&mut tasks, &message("done", None, Some("T-1"), 2));
        assert_eq!(tasks.get("T-1").unwrap().status, Some(TaskStatus::Done));

        apply_message_to_tasks(&mut tasks, &message("fail", None, Some("T-1"), 3));
        assert_eq!(tasks.get("T-1").unwrap().status, Some(TaskStatus::Failed));
        assert_eq!(tasks.get("T-1").unwrap().last_update_seq, Some(3));
    }

    #[test]
    fn verify_lifecycle_reaches_verified() {
        let mut tasks = TaskMap::new();
        apply_message_to_tasks(&mut tasks, &message("ask", Some("verify"), Some("T-2"), 4));
        assert_eq!(tasks.get("T-2").unwrap().status, Some(TaskStatus::VerifyPending));

        apply_message_to_tasks(&mut tasks, &message("done", Some("verified"), Some("T-2"), 5));
        assert_eq!(tasks.get("T-2").unwrap().status, Some(TaskStatus::Verified));
    }

    #[test]
    fn non_projecting_messages_leave_tasks_untouched() {
        let mut tasks = TaskMap::new();
        apply_message_to_tasks(&mut tasks, &message("report", Some("review_feedback"), Some("T-3"), 6));
        apply_message_to_tasks(&mut tasks, &message("ask", Some("assign"), None, 7));
        assert!(tasks.is_empty());
    }

    #[test]
    fn tasks_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        layout.ensure().unwrap();

        assert!(load_tasks(&layout).unwrap().is_empty());

        let mut tasks = TaskMap::new();
        apply_message_to_tasks(&mut tasks, &message("ask", Some("assign"), Some("T-1"), 1));
        save_tasks(&layout, &tasks).unwrap();
        assert_eq!(load_tasks(&layout).unwrap(), tasks);
    }
}
