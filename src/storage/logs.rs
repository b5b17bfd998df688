//! Epoch-segmented message and ack logs
//!
//! Each router process start opens a fresh `messages-<epoch>.jsonl` /
//! `acks-<epoch>.jsonl` pair; iteration walks every segment in epoch
//! order so recovery and trace see one continuous history.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::protocol::types::{AckStage, Message};

use super::jsonio::{StorageError, append_jsonl, iter_jsonl};
use super::layout::StorageLayout;

/// One acknowledgment record in `acks-<epoch>.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckEvent {
    pub id: String,
    pub ack: AckStage,
    pub agent: String,
    pub ts: u64,
}

/// Appends a message event (`event: "message"`) to the epoch's log.
///
/// # Errors
///
/// Returns an error when serialization or the append fails.
pub fn append_message_event(
    layout: &StorageLayout,
    epoch: u64,
    message: &Message,
) -> Result<(), StorageError> {
    let mut record = serde_json::to_value(message)?;
    if let Value::Object(map) = &mut record {
        map.insert("event".to_string(), Value::String("message".to_string()));
    }
    append_jsonl(&layout.messages_log_path(epoch), &record)
}

/// Appends an ack event (`event: "ack"`) to the epoch's log.
///
/// # Errors
///
/// Returns an error when serialization or the append fails.
pub fn append_ack_event(
    layout: &StorageLayout,
    epoch: u64,
    ack: &AckEvent,
) -> Result<(), StorageError> {
    let mut record = serde_json::to_value(ack)?;
    if let Value::Object(map) = &mut record {
        map.insert("event".to_string(), Value::String("ack".to_string()));
    }
    append_jsonl(&layout.acks_log_path(epoch), &record)
}

/// Message log segments in ascending epoch order.
#[must_use]
pub fn list_message_logs(layout: &StorageLayout) -> Vec<PathBuf> {
    list_epoch_logs(&layout.logs_dir(), "messages-")
}

/// Ack log segments in ascending epoch order.
#[must_use]
pub fn list_ack_logs(layout: &StorageLayout) -> Vec<PathBuf> {
    list_epoch_logs(&layout.logs_dir(), "acks-")
}

/// Streams every message event across all epochs in order.
#[must_use]
pub fn iter_message_events(layout: &StorageLayout) -> impl Iterator<Item = Message> + use<> {
    list_message_logs(layout)
        .into_iter()
        .flat_map(|path| iter_jsonl(&path))
        .filter_map(|value| {
            if value.get("event").and_then(Value::as_str) != Some("message") {
                return None;
            }
            let Value::Object(mut map) = value else {
                return None;
            };
            map.remove("event");
            serde_json::from_value(Value::Object(map)).ok()
        })
}

/// Streams every ack event across all epochs in order.
#[must_use]
pub fn iter_ack_events(layout: &StorageLayout) -> impl Iterator<Item = AckEvent> + use<> {
    list_ack_logs(layout)
        .into_iter()
        .flat_map(|path| iter_jsonl(&path))
        .filter_map(|value| {
            if value.get("event").and_then(Value::as_str) != Some("ack") {
                return None;
            }
            serde_json::from_value(value).ok()
        })
}

fn list_epoch_logs(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut segments: Vec<(u64, PathBuf)> = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(epoch) = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(".jsonl"))
            .and_then(|digits| digits.parse::<u64>().ok())
        else {
            continue;
        };
        segments.push((epoch, entry.path()));
    }
    segments.sort_by_key(|(epoch, _)| *epoch);
    segments.into_iter().map(|(_, path)| path).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(epoch: u64, seq: u64) -> Message {
        serde_json::from_value(json!({
            "v": "1",
            "session": "sess",
            "epoch": epoch,
            "seq": seq,
            "id": format!("sess-{epoch}-{seq}"),
            "ts": 1_000 + seq,
            "agent_instance": "MAIN-01",
            "from": "MAIN",
            "to": ["A"],
            "type": "ask"
        }))
        .unwrap()
    }

    #[test]
    fn message_events_iterate_across_epochs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        layout.ensure().unwrap();

        // Written out of epoch order on purpose; epoch 10 sorts after 2
        // numerically even though "10" < "2" lexically.
        append_message_event(&layout, 10, &message(10, 3)).unwrap();
        append_message_event(&layout, 2, &message(2, 1)).unwrap();
        append_message_event(&layout, 2, &message(2, 2)).unwrap();

        let ids: Vec<String> = iter_message_events(&layout).map(|m| m.id).collect();
        assert_eq!(ids, vec!["sess-2-1", "sess-2-2", "sess-10-3"]);
    }

    #[test]
    fn ack_events_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        layout.ensure().unwrap();

        let ack = AckEvent {
            id: "sess-1-1".to_string(),
            ack: AckStage::Delivered,
            agent: "A".to_string(),
            ts: 1_234,
        };
        append_ack_event(&layout, 1, &ack).unwrap();
        let events: Vec<AckEvent> = iter_ack_events(&layout).collect();
        assert_eq!(events, vec![ack]);
    }

    #[test]
    fn foreign_events_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::for_workspace(dir.path());
        layout.ensure().unwrap();

        append_jsonl(&layout.messages_log_path(1), &json!({"event": "checkpoint"})).unwrap();
        append_message_event(&layout, 1, &message(1, 1)).unwrap();
        assert_eq!(iter_message_events(&layout).count(), 1);
    }
}
