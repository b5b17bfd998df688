//! End-to-end router scenarios against real workspaces
//!
//! Drives a live `Router` (background worker included) with the
//! millisecond-scale testing configuration, checking the delivery
//! guarantees: retry on missing ack, deadline expiry, restart recovery,
//! and task projection.

use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use switchboard::protocol::types::InboxEventKind;
use switchboard::router::{DeliveryReceipt, DeliveryStatus, IngressReceipt, Router, RouterConfig};
use switchboard::state::tasks::TaskStatus;
use switchboard::storage::iter_inbox_events;

// Far enough out that real-clock tests never cross it.
const FAR_DEADLINE: u64 = 4_102_444_800_000;

fn open(workspace: &Path) -> Arc<Router> {
    Arc::new(Router::open(workspace, RouterConfig::testing()).unwrap())
}

fn assign_payload(to: &[&str], task_id: &str) -> Value {
    json!({
        "from": "MAIN",
        "to": to,
        "type": "ask",
        "action": "assign",
        "task_id": task_id,
        "owner": "MAIN",
        "deadline": FAR_DEADLINE,
        "agent_instance": "MAIN-01",
        "body_encoding": "json",
        "body": r#"{"task_type":"implement","files":["x"],"success_criteria":["ok"],"dependencies":[]}"#
    })
}

fn delivered(outcome: IngressReceipt) -> DeliveryReceipt {
    match outcome {
        IngressReceipt::Delivered(receipt) => receipt,
        IngressReceipt::Acked(ack) => panic!("expected delivery receipt, got {ack:?}"),
    }
}

#[tokio::test]
async fn smoke_assign_accept_lifecycle() {
    let workspace = tempfile::tempdir().unwrap();
    let router = open(workspace.path());

    let receipt = delivered(router.receive_message(assign_payload(&["A"], "SMOKE-1")).unwrap());
    assert_eq!(receipt.status, "delivered");
    assert_eq!(receipt.seq, 1);
    assert_eq!(receipt.acks.len(), 1);
    assert_eq!(receipt.acks[0].agent, "A");

    router
        .receive_ack(json!({"ack_stage": "accepted", "corr": receipt.id, "agent": "A"}))
        .unwrap();

    let status = router.status(true, None);
    assert_eq!(status.pending_inbox.get("A"), Some(&0));
    let tasks = status.tasks.unwrap();
    assert_eq!(tasks.get("SMOKE-1").unwrap().status, Some(TaskStatus::Open));
}

#[tokio::test]
async fn unacked_delivery_is_requeued_by_the_worker() {
    let workspace = tempfile::tempdir().unwrap();
    let router = open(workspace.path());
    Router::start(&router);

    let receipt = delivered(router.receive_message(assign_payload(&["A"], "T-1")).unwrap());

    // ack_timeout is 40ms and the worker ticks every 10ms; well before
    // 200ms the delivery must have been re-queued at least once.
    tokio::time::sleep(Duration::from_millis(200)).await;
    router.stop().await;

    let status = router.status(false, None);
    let delivery = status
        .deliveries
        .iter()
        .find(|delivery| delivery.message_id == receipt.id)
        .unwrap();
    assert!(delivery.retry_count >= 1, "delivery was never retried: {delivery:?}");

    let deliver_events = iter_inbox_events(router.layout(), "A")
        .filter(|event| event.event == InboxEventKind::Deliver)
        .count();
    assert!(deliver_events >= 2, "expected a re-appended deliver event");
}

#[tokio::test]
async fn expired_ttl_is_failed_with_deadline_exceeded() {
    let workspace = tempfile::tempdir().unwrap();
    let router = open(workspace.path());
    Router::start(&router);

    let mut payload = assign_payload(&["A"], "T-1");
    payload["ttl_ms"] = json!(10);
    let receipt = delivered(router.receive_message(payload).unwrap());

    tokio::time::sleep(Duration::from_millis(150)).await;
    router.stop().await;

    let status = router.status(false, None);
    let delivery = status
        .deliveries
        .iter()
        .find(|delivery| delivery.message_id == receipt.id)
        .unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.failure_reason.as_deref(), Some("deadline_exceeded"));

    let failures =
        std::fs::read_to_string(router.layout().failures_log_path()).unwrap();
    let lines: Vec<&str> = failures.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(&receipt.id));
    assert!(lines[0].contains("deadline_exceeded"));
}

#[tokio::test]
async fn restart_preserves_pending_and_counters() {
    let workspace = tempfile::tempdir().unwrap();
    let pending_id;
    {
        let router = open(workspace.path());
        let receipt = delivered(router.receive_message(assign_payload(&["B"], "T-1")).unwrap());
        pending_id = receipt.id;
        assert_eq!(router.epoch(), 1);
    }

    let router = open(workspace.path());
    assert_eq!(router.epoch(), 2, "epoch advances on restart");
    let status = router.status(false, None);
    assert_eq!(status.last_seq, 1, "last_seq survives restart");
    assert_eq!(status.pending_inbox.get("B"), Some(&1));

    let messages = router.pop_inbox("B", 1);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, pending_id);
}

#[tokio::test]
async fn sequence_numbers_are_monotonic_and_ids_unique() {
    let workspace = tempfile::tempdir().unwrap();
    let mut ids = Vec::new();
    {
        let router = open(workspace.path());
        for task in ["T-1", "T-2"] {
            ids.push(delivered(router.receive_message(assign_payload(&["A"], task)).unwrap()));
        }
    }
    {
        let router = open(workspace.path());
        for task in ["T-3", "T-4"] {
            ids.push(delivered(router.receive_message(assign_payload(&["A"], task)).unwrap()));
        }
    }

    let seqs: Vec<u64> = ids.iter().map(|receipt| receipt.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4]);
    let mut unique: Vec<&str> = ids.iter().map(|receipt| receipt.id.as_str()).collect();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 4);
}

#[tokio::test]
async fn recipient_queues_deliver_in_sequence_order() {
    let workspace = tempfile::tempdir().unwrap();
    let router = open(workspace.path());
    for task in ["T-1", "T-2", "T-3"] {
        router
            .receive_message(assign_payload(&["A", "B"], task))
            .unwrap();
    }

    let for_a: Vec<u64> = router.pop_inbox("A", 10).iter().map(|m| m.seq).collect();
    let for_b: Vec<u64> = router.pop_inbox("B", 10).iter().map(|m| m.seq).collect();
    assert_eq!(for_a, vec![1, 2, 3]);
    assert_eq!(for_b, vec![1, 2, 3]);
}

#[tokio::test]
async fn accepted_before_retry_stops_redelivery() {
    let workspace = tempfile::tempdir().unwrap();
    let router = open(workspace.path());
    Router::start(&router);

    let receipt = delivered(router.receive_message(assign_payload(&["A"], "T-1")).unwrap());
    let popped = router.pop_inbox("A", 1);
    assert_eq!(popped.len(), 1);
    router
        .receive_ack(json!({"ack_stage": "accepted", "corr": receipt.id, "agent": "A"}))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    router.stop().await;

    let status = router.status(false, None);
    assert_eq!(status.pending_inbox.get("A"), Some(&0));
    let delivery = &status.deliveries[0];
    assert_eq!(delivery.status, DeliveryStatus::Accepted);
    assert_eq!(delivery.retry_count, 0, "accepted deliveries are never retried");
}
