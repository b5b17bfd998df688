//! Protocol enums and the message record
//!
//! Every enum here is closed: a value off the list is a validation
//! error, never a passthrough. The [`Message`] record keeps unknown
//! top-level fields in a flattened map so persistence and redelivery
//! are lossless for forward-compatible senders.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Protocol version stamped onto messages that omit `v`.
pub const PROTOCOL_VERSION: &str = "1";

/// Message types accepted at ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Ask,
    Report,
    Send,
    Done,
    Fail,
    Ack,
    Nack,
}

impl MessageType {
    /// Parses a wire value, `None` when off the closed list.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ask" => Some(Self::Ask),
            "report" => Some(Self::Report),
            "send" => Some(Self::Send),
            "done" => Some(Self::Done),
            "fail" => Some(Self::Fail),
            "ack" => Some(Self::Ack),
            "nack" => Some(Self::Nack),
            _ => None,
        }
    }

    /// Wire spelling of the variant.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::Report => "report",
            Self::Send => "send",
            Self::Done => "done",
            Self::Fail => "fail",
            Self::Ack => "ack",
            Self::Nack => "nack",
        }
    }
}

/// Actions a message may carry. The router itself only branches on the
/// task-projecting subset; the rest matter to validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Review,
    ReviewFeedback,
    Assign,
    Clarify,
    Answer,
    Verify,
    Verified,
}

impl ActionType {
    /// Parses a wire value, `None` when off the closed list.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "review" => Some(Self::Review),
            "review_feedback" => Some(Self::ReviewFeedback),
            "assign" => Some(Self::Assign),
            "clarify" => Some(Self::Clarify),
            "answer" => Some(Self::Answer),
            "verify" => Some(Self::Verify),
            "verified" => Some(Self::Verified),
            _ => None,
        }
    }

    /// Wire spelling of the variant.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::ReviewFeedback => "review_feedback",
            Self::Assign => "assign",
            Self::Clarify => "clarify",
            Self::Answer => "answer",
            Self::Verify => "verify",
            Self::Verified => "verified",
        }
    }
}

/// Acknowledgment stages. `delivered` is emitted by the router on
/// enqueue; `accepted` and `nack` are posted by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStage {
    Delivered,
    Accepted,
    Nack,
}

impl AckStage {
    /// Parses a wire value, `None` when off the closed list.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "delivered" => Some(Self::Delivered),
            "accepted" => Some(Self::Accepted),
            "nack" => Some(Self::Nack),
            _ => None,
        }
    }

    /// Wire spelling of the variant.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Accepted => "accepted",
            Self::Nack => "nack",
        }
    }
}

/// Supported encodings for the single-line `body` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    Json,
    Base64,
}

impl BodyEncoding {
    /// Parses a wire value, `None` when off the closed list.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(Self::Json),
            "base64" => Some(Self::Base64),
            _ => None,
        }
    }
}

/// Per-agent inbox log event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxEventKind {
    Deliver,
    Accepted,
}

/// A validated, router-stamped message.
///
/// Immutable after ingress: `session`, `epoch`, `seq`, `id`, and `ts`
/// are assigned by the router, everything else came off the wire.
/// Unknown fields survive round trips via `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "de_version")]
    pub v: String,
    pub session: String,
    pub epoch: u64,
    pub seq: u64,
    pub id: String,
    pub ts: u64,
    pub agent_instance: String,
    pub from: String,
    pub to: Vec<String>,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Value>,
    #[serde(
        default,
        deserialize_with = "de_opt_int_like",
        skip_serializing_if = "Option::is_none"
    )]
    pub deadline: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corr: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_opt_int_like",
        skip_serializing_if = "Option::is_none"
    )]
    pub ttl_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<BodyEncoding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_ref: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Normalizes a `to` field into a list of non-empty trimmed strings.
///
/// Accepts either a JSON array of strings or a comma-separated string.
///
/// # Errors
///
/// Returns a human-readable reason when the value cannot be normalized.
pub fn normalize_to(value: &Value) -> Result<Vec<String>, String> {
    match value {
        Value::Array(items) => {
            let mut normalized = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str().map(str::trim) {
                    Some(target) if !target.is_empty() => normalized.push(target.to_string()),
                    _ => return Err("to list must contain non-empty strings".to_string()),
                }
            }
            if normalized.is_empty() {
                return Err("to list must not be empty".to_string());
            }
            Ok(normalized)
        }
        Value::String(joined) => {
            let parts: Vec<String> = joined
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(ToString::to_string)
                .collect();
            if parts.is_empty() {
                return Err("to string must contain at least one target".to_string());
            }
            Ok(parts)
        }
        _ => Err("to must be a list of strings or a comma-separated string".to_string()),
    }
}

/// Coerces an int-like JSON value (non-negative integer or digit
/// string) to `u64`.
#[must_use]
pub fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => {
            if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
                text.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

/// True when the value is an integer or a digit string. Booleans and
/// floats do not qualify.
#[must_use]
pub fn is_int_like(value: &Value) -> bool {
    match value {
        Value::Number(number) => number.is_i64() || number.is_u64(),
        Value::String(text) => !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()),
        _ => false,
    }
}

fn de_version<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(D::Error::custom(format!("v must be int-like, got {other}"))),
    }
}

fn de_opt_int_like<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => coerce_u64(&value)
            .map(Some)
            .ok_or_else(|| D::Error::custom("expected a non-negative integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_to_accepts_list_and_comma_string() {
        assert_eq!(
            normalize_to(&json!(["A", " B "])).unwrap(),
            vec!["A".to_string(), "B".to_string()]
        );
        assert_eq!(
            normalize_to(&json!("A, B,C")).unwrap(),
            vec!["A".to_string(), "B".to_string(), "C".to_string()]
        );
    }

    #[test]
    fn normalize_to_rejects_empty_and_non_string_targets() {
        assert!(normalize_to(&json!([])).is_err());
        assert!(normalize_to(&json!([""])).is_err());
        assert!(normalize_to(&json!([1, 2])).is_err());
        assert!(normalize_to(&json!(" , ")).is_err());
        assert!(normalize_to(&json!(42)).is_err());
    }

    #[test]
    fn int_like_accepts_digit_strings_but_not_floats() {
        assert!(is_int_like(&json!(7)));
        assert!(is_int_like(&json!("1700000000000")));
        assert!(!is_int_like(&json!(1.5)));
        assert!(!is_int_like(&json!(true)));
        assert!(!is_int_like(&json!("-3")));
        assert!(coerce_u64(&json!("42")).is_some());
        assert_eq!(coerce_u64(&json!("42")), Some(42));
    }

    #[test]
    fn message_round_trips_with_coercion_and_extras() {
        let raw = json!({
            "v": 1,
            "session": "sess",
            "epoch": 1,
            "seq": 3,
            "id": "sess-1-3",
            "ts": 1_700_000_000_000_u64,
            "agent_instance": "MAIN-01",
            "from": "MAIN",
            "to": ["A"],
            "type": "ask",
            "action": "assign",
            "task_id": "T-1",
            "deadline": "1700000001000",
            "ttl_ms": 5_000,
            "window_hint": "left"
        });
        let message: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(message.v, "1");
        assert_eq!(message.kind, MessageType::Ask);
        assert_eq!(message.action, Some(ActionType::Assign));
        assert_eq!(message.deadline, Some(1_700_000_001_000));
        assert_eq!(message.ttl_ms, Some(5_000));
        assert_eq!(message.extra.get("window_hint"), Some(&json!("left")));

        let back = serde_json::to_value(&message).unwrap();
        assert_eq!(back["type"], "ask");
        assert_eq!(back["window_hint"], "left");
        assert!(back.get("corr").is_none(), "absent options are omitted");
    }

    #[test]
    fn enums_reject_values_off_the_closed_list() {
        assert!(MessageType::parse("shout").is_none());
        assert!(ActionType::parse("review-feedback").is_none());
        assert!(AckStage::parse("seen").is_none());
        assert!(BodyEncoding::parse("utf8").is_none());
        assert_eq!(ActionType::ReviewFeedback.as_str(), "review_feedback");
    }
}
