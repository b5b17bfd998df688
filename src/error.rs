//! Error taxonomy for router operations
//!
//! The HTTP surface maps these onto status codes: validation and
//! protocol errors become 400 responses with the offending detail,
//! everything else collapses to an opaque 500.

use thiserror::Error;

use crate::router::config::ConfigError;
use crate::storage::StorageError;

/// Errors surfaced by router operations.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The message failed the protocol rulebook. Carries the full error
    /// list so clients can fix every field in one round trip.
    #[error("{}", errors.join("; "))]
    Validation { errors: Vec<String> },

    /// A structurally broken request: an ack missing required fields, a
    /// trace query with both or neither selector, a missing agent name.
    #[error("{message}")]
    Protocol { message: String },

    /// A durable write or read failed. In-memory state never advances
    /// past a failed write.
    #[error("storage error: {source}")]
    Storage {
        #[from]
        source: StorageError,
    },

    /// Serialization failure on data the router itself produced.
    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// The router was opened with an unusable configuration.
    #[error("configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },
}

impl RouterError {
    /// Builds a protocol error from anything stringly.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// True when the client is at fault and should see the detail.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Protocol { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_join_with_semicolons() {
        let err = RouterError::Validation {
            errors: vec!["missing field: to".into(), "type invalid: shout".into()],
        };
        assert_eq!(err.to_string(), "missing field: to; type invalid: shout");
        assert!(err.is_client_error());
    }

    #[test]
    fn storage_errors_are_not_client_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = RouterError::from(StorageError::from(io));
        assert!(!err.is_client_error());
    }
}
