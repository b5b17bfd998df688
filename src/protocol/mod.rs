//! Wire protocol for agent-to-router communication
//!
//! Defines the typed message record, the closed enums it draws from,
//! and the validation rulebook the router applies at ingress. Payloads
//! arrive as loose JSON so the validator can report every broken field
//! at once; the typed [`Message`] is only materialized after the
//! rulebook passes.

pub mod types;
pub mod validation;

pub use types::{
    AckStage, ActionType, BodyEncoding, InboxEventKind, Message, MessageType, coerce_u64,
    normalize_to,
};
pub use validation::validate_message;
