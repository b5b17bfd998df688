//! Crash recovery
//!
//! Rebuilds the router's authoritative in-memory view from what
//! survived on disk. Inbox files are the primary source for pending
//! ids; when an agent's inbox file is missing the queue is
//! reconstructed from the message and ack logs instead (delivered set
//! minus accepted set, ordered by sequence number).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;

use crate::protocol::types::AckStage;
use crate::storage::{
    StorageError, StorageLayout, iter_ack_events, iter_message_events, load_pending_ids,
};

use super::router_state::{RouterState, load_router_state};
use super::tasks::{TaskMap, apply_message_to_tasks, load_tasks};

/// Everything recovery reconstructs at startup.
#[derive(Debug, Clone)]
pub struct RecoveryResult {
    /// Router counters with the epoch already advanced for this start.
    pub router_state: RouterState,
    /// Pending message ids per agent, in delivery order.
    pub inbox_by_agent: BTreeMap<String, Vec<String>>,
    /// Task map, loaded or replayed.
    pub tasks: TaskMap,
    /// Highest epoch observed before this start (0 for a fresh workspace).
    pub max_epoch: u64,
    /// Highest sequence number observed before this start.
    pub max_seq: u64,
}

/// Runs the full recovery procedure for a workspace.
///
/// # Errors
///
/// Returns an error when a state file exists but cannot be read.
pub fn recover_state(layout: &StorageLayout) -> Result<RecoveryResult, StorageError> {
    layout.ensure()?;
    let agents = discover_agents(layout);
    let (router_state, max_epoch, max_seq) = recover_router_state(layout)?;
    let tasks = recover_tasks(layout)?;
    let inbox_by_agent = recover_inbox(layout, &agents);
    Ok(RecoveryResult {
        router_state,
        inbox_by_agent,
        tasks,
        max_epoch,
        max_seq,
    })
}

/// Union of inbox file stems and every target named by a logged message.
#[must_use]
pub fn discover_agents(layout: &StorageLayout) -> Vec<String> {
    let mut agents: BTreeSet<String> = BTreeSet::new();
    if let Ok(entries) = fs::read_dir(layout.inbox_dir()) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Some(stem) = name.to_str().and_then(|name| name.strip_suffix(".jsonl")) {
                agents.insert(stem.to_string());
            }
        }
    }
    for message in iter_message_events(layout) {
        for target in message.to {
            agents.insert(target);
        }
    }
    agents.into_iter().collect()
}

fn recover_router_state(
    layout: &StorageLayout,
) -> Result<(RouterState, u64, u64), StorageError> {
    if layout.router_state_path().exists() {
        let state = load_router_state(layout)?.increment_epoch();
        return Ok((state, state.epoch - 1, state.last_seq));
    }

    let (max_epoch, max_seq) = scan_logs_for_max(layout);
    let next_epoch = if max_epoch > 0 { max_epoch + 1 } else { 1 };
    let state = RouterState {
        epoch: next_epoch,
        last_seq: max_seq,
        last_ts: None,
    };
    Ok((state, max_epoch, max_seq))
}

fn scan_logs_for_max(layout: &StorageLayout) -> (u64, u64) {
    let mut max_epoch = 0;
    let mut max_seq = 0;
    for message in iter_message_events(layout) {
        max_epoch = max_epoch.max(message.epoch);
        max_seq = max_seq.max(message.seq);
    }
    (max_epoch, max_seq)
}

fn recover_inbox(layout: &StorageLayout, agents: &[String]) -> BTreeMap<String, Vec<String>> {
    let any_missing = agents
        .iter()
        .any(|agent| !layout.inbox_path(agent).exists());
    let fallback = if any_missing {
        rebuild_inbox_from_logs(layout, agents)
    } else {
        BTreeMap::new()
    };

    let mut inbox_by_agent = BTreeMap::new();
    for agent in agents {
        let pending = if layout.inbox_path(agent).exists() {
            load_pending_ids(layout, agent)
        } else {
            fallback.get(agent).cloned().unwrap_or_default()
        };
        inbox_by_agent.insert(agent.clone(), pending);
    }
    inbox_by_agent
}

fn rebuild_inbox_from_logs(
    layout: &StorageLayout,
    agents: &[String],
) -> BTreeMap<String, Vec<String>> {
    let mut message_order: HashMap<String, u64> = HashMap::new();
    for message in iter_message_events(layout) {
        message_order.insert(message.id, message.seq);
    }

    let mut delivered: BTreeSet<(String, String)> = BTreeSet::new();
    let mut accepted: BTreeSet<(String, String)> = BTreeSet::new();
    for ack in iter_ack_events(layout) {
        let key = (ack.agent, ack.id);
        match ack.ack {
            AckStage::Delivered => {
                delivered.insert(key);
            }
            AckStage::Accepted => {
                accepted.insert(key);
            }
            AckStage::Nack => {}
        }
    }

    // Older workspaces predate delivered-ack records; fall back to
    // treating every logged recipient as delivered.
    if delivered.is_empty() {
        for message in iter_message_events(layout) {
            for agent in message.to {
                delivered.insert((agent, message.id.clone()));
            }
        }
    }

    let mut inbox_by_agent: BTreeMap<String, Vec<String>> = agents
        .iter()
        .map(|agent| (agent.clone(), Vec::new()))
        .collect();
    for (agent, message_id) in delivered {
        if accepted.contains(&(agent.clone(), message_id.clone())) {
            continue;
        }
        inbox_by_agent.entry(agent).or_default().push(message_id);
    }
    for pending in inbox_by_agent.values_mut() {
        pending.sort_by_key(|id| message_order.get(id).copied().unwrap_or(0));
    }
    inbox_by_agent
}

fn recover_tasks(layout: &StorageLayout) -> Result<TaskMap, StorageError> {
    if layout.tasks_path().exists() {
        return load_tasks(layout);
    }

    let mut events: Vec<_> = iter_message_events(layout).collect();
    events.sort_by_key(|message| (message.epoch, message.seq));
    let mut tasks = TaskMap::new();
    for message in &events {
        apply_message_to_tasks(&mut tasks, message);
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{InboxEventKind, Message};
    use crate::state::router_state::save_router_state;
    use crate::state::tasks::TaskStatus;
    use crate::storage::{AckEvent, append_ack_event, append_inbox_event, append_message_event};
    use serde_json::json;

    fn message(epoch: u64, seq: u64, to: &[&str], action: Option<&str>) -> Message {
        let mut raw = json!({
            "v": "1",
            "session": "sess",
            "epoch": epoch,
            "seq": seq,
            "id": format!("sess-{epoch}-{seq}"),
            "ts": 1_000 + seq,
            "agent_instance": "MAIN-01",
            "from": "MAIN",
            "to": to,
            "type": "ask"
        });
        if let Some(action) = action {
            raw["action"] = json!(action);
            raw["task_id"] = json!("T-1");
        }
        serde_json::from_value(raw).unwrap()
    }

    fn ack(id: &str, stage: AckStage, agent: &str) -> AckEvent {
        AckEvent {
            id: id.to_string(),
            ack: stage,
            agent: agent.to_string(),
            ts: 2_000,
        }
    }

    #[test]
    fn fresh_workspace_starts_at_epoch_one() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        let recovered = recover_state(&layout).unwrap();
        assert_eq!(recovered.router_state.epoch, 1);
        assert_eq!(recovered.router_state.last_seq, 0);
        assert!(recovered.inbox_by_agent.is_empty());
        assert!(recovered.tasks.is_empty());
    }

    #[test]
    fn existing_state_file_advances_epoch_and_keeps_seq() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        layout.ensure().unwrap();
        save_router_state(
            &layout,
            &RouterState {
                epoch: 4,
                last_seq: 17,
                last_ts: Some(1_000),
            },
        )
        .unwrap();

        let recovered = recover_state(&layout).unwrap();
        assert_eq!(recovered.router_state.epoch, 5);
        assert_eq!(recovered.router_state.last_seq, 17);
        assert_eq!(recovered.max_epoch, 4);
        assert_eq!(recovered.max_seq, 17);
    }

    #[test]
    fn missing_state_file_is_rebuilt_from_log_scan() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        layout.ensure().unwrap();
        append_message_event(&layout, 2, &message(2, 5, &["A"], None)).unwrap();
        append_message_event(&layout, 3, &message(3, 9, &["B"], None)).unwrap();

        let recovered = recover_state(&layout).unwrap();
        assert_eq!(recovered.router_state.epoch, 4);
        assert_eq!(recovered.router_state.last_seq, 9);
    }

    #[test]
    fn inbox_files_are_the_primary_pending_source() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        layout.ensure().unwrap();
        append_message_event(&layout, 1, &message(1, 1, &["A"], None)).unwrap();
        append_inbox_event(&layout, "A", InboxEventKind::Deliver, "sess-1-1", 10).unwrap();

        let recovered = recover_state(&layout).unwrap();
        assert_eq!(
            recovered.inbox_by_agent.get("A"),
            Some(&vec!["sess-1-1".to_string()])
        );
    }

    #[test]
    fn missing_inbox_file_falls_back_to_log_difference() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        layout.ensure().unwrap();
        append_message_event(&layout, 1, &message(1, 1, &["A", "B"], None)).unwrap();
        append_message_event(&layout, 1, &message(1, 2, &["B"], None)).unwrap();
        append_ack_event(&layout, 1, &ack("sess-1-1", AckStage::Delivered, "A")).unwrap();
        append_ack_event(&layout, 1, &ack("sess-1-1", AckStage::Delivered, "B")).unwrap();
        append_ack_event(&layout, 1, &ack("sess-1-2", AckStage::Delivered, "B")).unwrap();
        append_ack_event(&layout, 1, &ack("sess-1-1", AckStage::Accepted, "B")).unwrap();

        let recovered = recover_state(&layout).unwrap();
        assert_eq!(
            recovered.inbox_by_agent.get("A"),
            Some(&vec!["sess-1-1".to_string()])
        );
        assert_eq!(
            recovered.inbox_by_agent.get("B"),
            Some(&vec!["sess-1-2".to_string()])
        );
    }

    #[test]
    fn tasks_are_replayed_in_epoch_then_seq_order() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        layout.ensure().unwrap();
        append_message_event(&layout, 2, &message(2, 3, &["A"], Some("verify"))).unwrap();
        append_message_event(&layout, 1, &message(1, 1, &["A"], Some("assign"))).unwrap();

        let recovered = recover_state(&layout).unwrap();
        assert_eq!(
            recovered.tasks.get("T-1").unwrap().status,
            Some(TaskStatus::VerifyPending)
        );
    }

    #[test]
    fn recovery_is_idempotent_against_unchanged_logs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        layout.ensure().unwrap();
        append_message_event(&layout, 1, &message(1, 1, &["A"], Some("assign"))).unwrap();
        append_ack_event(&layout, 1, &ack("sess-1-1", AckStage::Delivered, "A")).unwrap();

        let first = recover_state(&layout).unwrap();
        let second = recover_state(&layout).unwrap();
        assert_eq!(first.inbox_by_agent, second.inbox_by_agent);
        assert_eq!(first.tasks, second.tasks);
        assert_eq!(first.router_state, second.router_state);
    }
}
