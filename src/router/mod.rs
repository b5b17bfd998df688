//! Core message router
//!
//! Mediates typed messages among a small team of cooperating agents on
//! one workstation:
//!
//! - **Validated ingress**: every message passes the protocol rulebook
//!   before it is assigned a sequence number.
//! - **At-least-once delivery**: per-recipient inbox queues with a
//!   two-stage acknowledgment state machine and bounded, jittered
//!   retries.
//! - **Durability**: every event is appended to a log before the
//!   corresponding in-memory transition; a restart rebuilds queues and
//!   task state from the logs.
//! - **Presence**: a heartbeat registry resolves role names to live
//!   agent instances at delivery time.
//!
//! All mutable routing state lives behind one coarse mutex inside
//! [`Router`]; a single background worker drives retries, deadlines,
//! and presence expiry.

pub mod config;
pub mod core;
pub mod delivery;
pub mod presence;

pub use self::config::{ConfigError, RouterConfig, RouterConfigBuilder};
pub use self::core::{
    AckReceipt, DeliveryReceipt, IngressReceipt, PresencePayload, PresenceQueryReply,
    PresenceSummary, Router, StatusReport, TraceReport,
};
pub use self::delivery::{
    DeliveryKey, DeliveryState, DeliveryStatus, FailureLog, FailureRecord, FailureSink,
};
pub use self::presence::{PresenceEntry, PresenceRegistry, PresenceStatus};
