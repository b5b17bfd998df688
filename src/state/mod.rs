//! Router state, task projection, and crash recovery
//!
//! The `(epoch, last_seq)` counter, the task lifecycle map derived from
//! action-bearing messages, and the startup procedure that rebuilds both
//! (plus every inbox queue) from the append-only logs.

pub mod recovery;
pub mod router_state;
pub mod tasks;

pub use recovery::{RecoveryResult, discover_agents, recover_state};
pub use router_state::{RouterState, load_router_state, save_router_state};
pub use tasks::{TaskMap, TaskRecord, TaskStatus, apply_message_to_tasks, load_tasks, save_tasks};
