//! Per-agent inbox event logs
//!
//! `inbox/<agent>.jsonl` mirrors the agent's queue as a fold: `deliver`
//! pushes an id if absent, `accepted` removes it. The pending-id list is
//! exactly the ids whose latest event is `deliver`.

use serde::{Deserialize, Serialize};

use crate::protocol::types::InboxEventKind;

use super::jsonio::{StorageError, append_jsonl, iter_jsonl};
use super::layout::StorageLayout;

/// One record in an agent's inbox log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxEvent {
    pub event: InboxEventKind,
    pub id: String,
    pub ts: u64,
}

/// Appends an inbox event for an agent.
///
/// # Errors
///
/// Returns an error when the append fails.
pub fn append_inbox_event(
    layout: &StorageLayout,
    agent: &str,
    event: InboxEventKind,
    message_id: &str,
    ts: u64,
) -> Result<(), StorageError> {
    let record = InboxEvent {
        event,
        id: message_id.to_string(),
        ts,
    };
    append_jsonl(&layout.inbox_path(agent), &record)
}

/// Streams an agent's inbox events in append order.
#[must_use]
pub fn iter_inbox_events(
    layout: &StorageLayout,
    agent: &str,
) -> impl Iterator<Item = InboxEvent> + use<> {
    iter_jsonl(&layout.inbox_path(agent)).filter_map(|value| serde_json::from_value(value).ok())
}

/// Folds inbox events into the ordered pending-id list.
#[must_use]
pub fn pending_ids_from_events(events: impl Iterator<Item = InboxEvent>) -> Vec<String> {
    let mut pending: Vec<String> = Vec::new();
    for event in events {
        match event.event {
            InboxEventKind::Deliver => {
                if !pending.contains(&event.id) {
                    pending.push(event.id);
                }
            }
            InboxEventKind::Accepted => {
                pending.retain(|id| id != &event.id);
            }
        }
    }
    pending
}

/// Pending ids for an agent, straight from its inbox log.
#[must_use]
pub fn load_pending_ids(layout: &StorageLayout, agent: &str) -> Vec<String> {
    pending_ids_from_events(iter_inbox_events(layout, agent))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: InboxEventKind, id: &str, ts: u64) -> InboxEvent {
        InboxEvent {
            event: kind,
            id: id.to_string(),
            ts,
        }
    }

    #[test]
    fn fold_keeps_ids_whose_latest_event_is_deliver() {
        let events = vec![
            event(InboxEventKind::Deliver, "m1", 1),
            event(InboxEventKind::Deliver, "m2", 2),
            event(InboxEventKind::Accepted, "m1", 3),
            event(InboxEventKind::Deliver, "m3", 4),
        ];
        assert_eq!(
            pending_ids_from_events(events.into_iter()),
            vec!["m2".to_string(), "m3".to_string()]
        );
    }

    #[test]
    fn redelivery_does_not_duplicate_a_pending_id() {
        let events = vec![
            event(InboxEventKind::Deliver, "m1", 1),
            event(InboxEventKind::Deliver, "m1", 2),
        ];
        assert_eq!(pending_ids_from_events(events.into_iter()), vec!["m1".to_string()]);
    }

    #[test]
    fn accept_before_deliver_leaves_nothing_pending() {
        let events = vec![
            event(InboxEventKind::Accepted, "m1", 1),
            event(InboxEventKind::Deliver, "m2", 2),
            event(InboxEventKind::Accepted, "m2", 3),
        ];
        assert!(pending_ids_from_events(events.into_iter()).is_empty());
    }

    #[test]
    fn events_round_trip_through_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        layout.ensure().unwrap();

        append_inbox_event(&layout, "A-abc", InboxEventKind::Deliver, "m1", 10).unwrap();
        append_inbox_event(&layout, "A-abc", InboxEventKind::Accepted, "m1", 20).unwrap();
        append_inbox_event(&layout, "A-abc", InboxEventKind::Deliver, "m2", 30).unwrap();

        assert_eq!(load_pending_ids(&layout, "A-abc"), vec!["m2".to_string()]);
        assert!(load_pending_ids(&layout, "B-unknown").is_empty());
    }
}
