//! # Switchboard - Loopback Message Router for Agent Teams
//!
//! Switchboard mediates structured communication among a small team of
//! cooperating autonomous agents (roles like MAIN, A, B, C, D) running
//! in sibling terminal windows on one workstation. Agents post typed
//! messages (ask / report / send / done / fail) over a loopback HTTP
//! endpoint; the router fans them out to per-recipient inboxes, tracks
//! delivery and acceptance acknowledgments, retries undelivered
//! messages with bounded backoff, persists every event to append-only
//! logs, and answers status and trace queries.
//!
//! ## Guarantees
//!
//! - **At-least-once delivery** with bounded, jittered retries and two
//!   delivery timers (ack timeout and absolute expiry).
//! - **Crash recovery**: queues, delivery states, counters, and task
//!   state are rebuilt from the append-only logs on restart; the epoch
//!   advances, sequence numbers never repeat.
//! - **Workspace-monotonic ordering**: sequence numbers strictly
//!   increase; per-recipient queues deliver in sequence order.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use switchboard::router::{Router, RouterConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let router = Arc::new(Router::open(Path::new("./workspace"), RouterConfig::default())?);
//! Router::start(&router);
//!
//! let app = switchboard::http_api::create_app(Arc::clone(&router));
//! let (listener, addr) = switchboard::server::bind("127.0.0.1", 8765).await?;
//! println!("routing on {addr}");
//! switchboard::server::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod domain_types;
pub mod error;
pub mod http_api;
pub mod protocol;
pub mod router;
pub mod server;
pub mod state;
pub mod storage;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::error::RouterError;
pub use crate::protocol::types::{AckStage, ActionType, BodyEncoding, Message, MessageType};
pub use crate::router::{Router, RouterConfig, RouterConfigBuilder};
pub use crate::storage::StorageLayout;
