//! Durable storage for the router
//!
//! Everything under `<workspace>/.codex_team/` is owned by this process:
//! atomically rewritten state files (`*.json`) and append-only event
//! logs (`*.jsonl`). The append of an event always precedes the
//! corresponding in-memory transition, so a crash can lose at most work
//! the caller never saw acknowledged.

pub mod blobs;
pub mod inbox;
pub mod jsonio;
pub mod layout;
pub mod logs;
pub mod session;

pub use blobs::{read_blob, write_blob};
pub use inbox::{InboxEvent, append_inbox_event, iter_inbox_events, load_pending_ids, pending_ids_from_events};
pub use jsonio::{StorageError, append_jsonl, iter_jsonl, read_json, write_json_atomic};
pub use layout::StorageLayout;
pub use logs::{AckEvent, append_ack_event, append_message_event, iter_ack_events, iter_message_events};
pub use session::{Session, init_or_load_session};
