//! Delivery state machine records
//!
//! One record per `(message_id, agent)` pair tracks the two-stage
//! acknowledgment lifecycle: created as `delivered` on enqueue, advanced
//! to `accepted` by a positive ack, or to `failed` by a nack, an expired
//! deadline, or exhausted retries.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::error;

use crate::protocol::types::Message;
use crate::storage::append_jsonl;

/// Terminal and non-terminal delivery statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Accepted,
    Failed,
}

/// Map key for delivery records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryKey {
    pub message_id: String,
    pub agent: String,
}

impl DeliveryKey {
    /// Key for a `(message_id, agent)` pair.
    #[must_use]
    pub fn new(message_id: &str, agent: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            agent: agent.to_string(),
        }
    }
}

/// State of one message's delivery to one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryState {
    pub message_id: String,
    pub agent: String,
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub first_ts: u64,
    pub last_ts: u64,
    pub next_retry_at: Option<u64>,
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl DeliveryState {
    /// Fresh record for a just-enqueued delivery.
    #[must_use]
    pub fn delivered(
        message_id: &str,
        agent: &str,
        now: u64,
        ack_timeout_ms: u64,
        expires_at: Option<u64>,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            agent: agent.to_string(),
            status: DeliveryStatus::Delivered,
            retry_count: 0,
            first_ts: now,
            last_ts: now,
            next_retry_at: Some(now + ack_timeout_ms),
            expires_at,
            failure_reason: None,
        }
    }

    /// True once no further transition can occur.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, DeliveryStatus::Accepted | DeliveryStatus::Failed)
    }
}

/// Absolute expiry for a message: `ts + ttl_ms` and `deadline`,
/// whichever comes first; `None` when the message carries neither.
#[must_use]
pub fn compute_expires_at(message: &Message) -> Option<u64> {
    let from_ttl = message.ttl_ms.map(|ttl| message.ts + ttl);
    match (from_ttl, message.deadline) {
        (Some(ttl), Some(deadline)) => Some(ttl.min(deadline)),
        (Some(ttl), None) => Some(ttl),
        (None, Some(deadline)) => Some(deadline),
        (None, None) => None,
    }
}

/// One permanent delivery failure, as written to `logs/failures.log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub message_id: String,
    pub agent: String,
    pub reason: String,
    pub retry_count: u32,
}

/// Sink for permanent delivery failures.
pub trait FailureSink: Send + Sync + std::fmt::Debug {
    /// Records one failure. Must not panic; the router calls this from
    /// its core paths.
    fn record(&self, failure: &FailureRecord);
}

/// Default sink: appends each failure as a JSON line to
/// `logs/failures.log`.
#[derive(Debug)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    /// Sink writing to the given path.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl FailureSink for FailureLog {
    fn record(&self, failure: &FailureRecord) {
        if let Err(write_err) = append_jsonl(&self.path, failure) {
            error!(path = %self.path.display(), error = %write_err, "failed to record delivery failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(ts: u64, ttl_ms: Option<u64>, deadline: Option<u64>) -> Message {
        let mut raw = json!({
            "v": "1",
            "session": "sess",
            "epoch": 1,
            "seq": 1,
            "id": "sess-1-1",
            "ts": ts,
            "agent_instance": "MAIN-01",
            "from": "MAIN",
            "to": ["A"],
            "type": "ask"
        });
        if let Some(ttl_ms) = ttl_ms {
            raw["ttl_ms"] = json!(ttl_ms);
        }
        if let Some(deadline) = deadline {
            raw["deadline"] = json!(deadline);
        }
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn expiry_is_the_earlier_of_ttl_and_deadline() {
        assert_eq!(compute_expires_at(&message(1_000, Some(500), None)), Some(1_500));
        assert_eq!(compute_expires_at(&message(1_000, None, Some(1_200))), Some(1_200));
        assert_eq!(
            compute_expires_at(&message(1_000, Some(500), Some(1_200))),
            Some(1_200)
        );
        assert_eq!(
            compute_expires_at(&message(1_000, Some(100), Some(1_200))),
            Some(1_100)
        );
        assert_eq!(compute_expires_at(&message(1_000, None, None)), None);
    }

    #[test]
    fn fresh_delivery_schedules_its_first_retry() {
        let state = DeliveryState::delivered("sess-1-1", "A", 1_000, 120_000, Some(5_000));
        assert_eq!(state.status, DeliveryStatus::Delivered);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.next_retry_at, Some(121_000));
        assert_eq!(state.expires_at, Some(5_000));
        assert!(!state.is_terminal());
    }

    #[test]
    fn failure_log_appends_one_line_per_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failures.log");
        let sink = FailureLog::new(path.clone());
        sink.record(&FailureRecord {
            message_id: "sess-1-1".to_string(),
            agent: "A".to_string(),
            reason: "deadline_exceeded".to_string(),
            retry_count: 0,
        });
        sink.record(&FailureRecord {
            message_id: "sess-1-2".to_string(),
            agent: "B".to_string(),
            reason: "max_retries".to_string(),
            retry_count: 5,
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("deadline_exceeded"));
        assert!(lines[1].contains("max_retries"));
    }
}
