//! Domain types for the switchboard router
//!
//! Strongly-typed configuration quantities to prevent primitive
//! obsession: a bare `u64` says nothing about whether it is a timeout,
//! an interval, or a multiplier, and the difference is exactly where
//! delivery bugs hide.

use nutype::nutype;
use std::time::Duration;

/// How long a delivered message may sit unacknowledged before the retry
/// loop re-queues it.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 86_400_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 120_000
)]
pub struct AckTimeoutMs(u64);

impl AckTimeoutMs {
    /// Gets the value as u64.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Tick interval of the background retry worker.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 500
)]
pub struct RetryPollIntervalMs(u64);

impl RetryPollIntervalMs {
    /// Gets the value as u64.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }

    /// Converts to a `Duration` for the worker ticker.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.into_inner())
    }
}

/// Maximum redelivery attempts before a delivery is marked failed.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 5
)]
pub struct MaxRetries(u32);

impl MaxRetries {
    /// Gets the value as u32.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

/// Time-to-live stamped onto messages that do not carry their own.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 604_800_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 3_600_000
)]
pub struct DefaultTtlMs(u64);

impl DefaultTtlMs {
    /// Gets the value as u64.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Symmetric jitter applied to retry backoff, as a ratio of the base
/// delay (0.0 disables jitter).
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 0.2
)]
pub struct JitterRatio(f64);

impl JitterRatio {
    /// Gets the value as f64.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.into_inner()
    }
}

/// Expected heartbeat cadence of live agents.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 3_600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 30_000
)]
pub struct PresenceIntervalMs(u64);

impl PresenceIntervalMs {
    /// Gets the value as u64.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Number of missed heartbeat intervals after which an agent is marked
/// offline.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 2
)]
pub struct PresenceTimeoutMultiplier(u32);

impl PresenceTimeoutMultiplier {
    /// Gets the value as u32.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}
