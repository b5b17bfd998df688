//! Router configuration
//!
//! Every timing knob the delivery state machine and presence registry
//! consume, with protocol defaults and a builder for tests and embedders.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::{
    AckTimeoutMs, DefaultTtlMs, JitterRatio, MaxRetries, PresenceIntervalMs,
    PresenceTimeoutMultiplier, RetryPollIntervalMs,
};

/// Default retry backoff ladder in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: [u64; 5] = [30_000, 120_000, 300_000, 600_000, 600_000];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {field} - {reason}")]
    ValidationError { field: String, reason: String },
}

/// Complete router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// How long a delivered message may wait for an `accepted` ack.
    pub ack_timeout_ms: AckTimeoutMs,
    /// Backoff ladder indexed by retry count; the last entry repeats.
    pub retry_backoff_ms: Vec<u64>,
    /// Redelivery attempts before a delivery fails permanently.
    pub max_retries: MaxRetries,
    /// TTL stamped onto messages that do not carry one.
    pub default_ttl_ms: DefaultTtlMs,
    /// Symmetric jitter ratio applied to each backoff delay.
    pub jitter_ratio: JitterRatio,
    /// Background retry worker tick.
    pub retry_poll_interval_ms: RetryPollIntervalMs,
    /// Expected agent heartbeat cadence.
    pub presence_interval_ms: PresenceIntervalMs,
    /// Missed intervals before an agent is marked offline.
    pub presence_timeout_multiplier: PresenceTimeoutMultiplier,
}

impl RouterConfig {
    /// Configuration for tests: millisecond-scale timers so timeout and
    /// deadline paths run quickly.
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded values fall outside their domain types.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            ack_timeout_ms: AckTimeoutMs::try_new(40).unwrap(),
            retry_backoff_ms: vec![10, 20, 40],
            max_retries: MaxRetries::try_new(3).unwrap(),
            default_ttl_ms: DefaultTtlMs::try_new(60_000).unwrap(),
            jitter_ratio: JitterRatio::try_new(0.0).unwrap(),
            retry_poll_interval_ms: RetryPollIntervalMs::try_new(10).unwrap(),
            presence_interval_ms: PresenceIntervalMs::try_new(50).unwrap(),
            presence_timeout_multiplier: PresenceTimeoutMultiplier::try_new(2).unwrap(),
        }
    }

    /// Creates a configuration builder starting from the defaults.
    #[must_use]
    pub fn builder() -> RouterConfigBuilder {
        RouterConfigBuilder::new()
    }

    /// Validates cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a value or combination is unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_backoff_ms.is_empty() {
            return Err(ConfigError::ValidationError {
                field: "retry_backoff_ms".to_string(),
                reason: "must contain at least one delay".to_string(),
            });
        }
        if self.retry_backoff_ms.iter().any(|&delay| delay == 0) {
            return Err(ConfigError::ValidationError {
                field: "retry_backoff_ms".to_string(),
                reason: "delays must be positive".to_string(),
            });
        }
        if self.retry_poll_interval_ms.as_u64() > self.ack_timeout_ms.as_u64() {
            return Err(ConfigError::ValidationError {
                field: "retry_poll_interval_ms".to_string(),
                reason: "should not exceed ack_timeout_ms".to_string(),
            });
        }
        Ok(())
    }

    /// Presence timeout derived from interval and multiplier.
    #[must_use]
    pub fn presence_timeout_ms(&self) -> u64 {
        self.presence_interval_ms.as_u64() * u64::from(self.presence_timeout_multiplier.as_u32())
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: AckTimeoutMs::default(),
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS.to_vec(),
            max_retries: MaxRetries::default(),
            default_ttl_ms: DefaultTtlMs::default(),
            jitter_ratio: JitterRatio::default(),
            retry_poll_interval_ms: RetryPollIntervalMs::default(),
            presence_interval_ms: PresenceIntervalMs::default(),
            presence_timeout_multiplier: PresenceTimeoutMultiplier::default(),
        }
    }
}

/// Builder for custom router configurations.
pub struct RouterConfigBuilder {
    config: RouterConfig,
}

impl RouterConfigBuilder {
    /// Creates a new builder starting from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RouterConfig::default(),
        }
    }

    /// Sets the ack timeout.
    #[must_use]
    pub fn ack_timeout_ms(mut self, timeout: AckTimeoutMs) -> Self {
        self.config.ack_timeout_ms = timeout;
        self
    }

    /// Sets the retry backoff ladder.
    #[must_use]
    pub fn retry_backoff_ms(mut self, backoff: Vec<u64>) -> Self {
        self.config.retry_backoff_ms = backoff;
        self
    }

    /// Sets the maximum redelivery attempts.
    #[must_use]
    pub fn max_retries(mut self, retries: MaxRetries) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Sets the default message TTL.
    #[must_use]
    pub fn default_ttl_ms(mut self, ttl: DefaultTtlMs) -> Self {
        self.config.default_ttl_ms = ttl;
        self
    }

    /// Sets the jitter ratio.
    #[must_use]
    pub fn jitter_ratio(mut self, ratio: JitterRatio) -> Self {
        self.config.jitter_ratio = ratio;
        self
    }

    /// Sets the retry worker tick.
    #[must_use]
    pub fn retry_poll_interval_ms(mut self, interval: RetryPollIntervalMs) -> Self {
        self.config.retry_poll_interval_ms = interval;
        self
    }

    /// Sets the expected heartbeat cadence.
    #[must_use]
    pub fn presence_interval_ms(mut self, interval: PresenceIntervalMs) -> Self {
        self.config.presence_interval_ms = interval;
        self
    }

    /// Sets the presence timeout multiplier.
    #[must_use]
    pub fn presence_timeout_multiplier(mut self, multiplier: PresenceTimeoutMultiplier) -> Self {
        self.config.presence_timeout_multiplier = multiplier;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when validation fails.
    pub fn build(self) -> Result<RouterConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for RouterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_protocol_contract() {
        let config = RouterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ack_timeout_ms.as_u64(), 120_000);
        assert_eq!(config.retry_backoff_ms, DEFAULT_RETRY_BACKOFF_MS.to_vec());
        assert_eq!(config.max_retries.as_u32(), 5);
        assert_eq!(config.default_ttl_ms.as_u64(), 3_600_000);
        assert_eq!(config.retry_poll_interval_ms.as_u64(), 500);
        assert_eq!(config.presence_timeout_ms(), 60_000);
    }

    #[test]
    fn testing_config_is_valid() {
        assert!(RouterConfig::testing().validate().is_ok());
    }

    #[test]
    fn builder_overrides_individual_knobs() {
        let config = RouterConfig::builder()
            .ack_timeout_ms(AckTimeoutMs::try_new(5_000).unwrap())
            .retry_backoff_ms(vec![1_000, 2_000])
            .max_retries(MaxRetries::try_new(2).unwrap())
            .build()
            .unwrap();
        assert_eq!(config.ack_timeout_ms.as_u64(), 5_000);
        assert_eq!(config.retry_backoff_ms, vec![1_000, 2_000]);
        assert_eq!(config.max_retries.as_u32(), 2);
    }

    #[test]
    fn empty_backoff_ladder_fails_validation() {
        let result = RouterConfig::builder().retry_backoff_ms(Vec::new()).build();
        assert!(result.is_err());
    }

    #[test]
    fn poll_interval_may_not_exceed_ack_timeout() {
        let result = RouterConfig::builder()
            .ack_timeout_ms(AckTimeoutMs::try_new(100).unwrap())
            .retry_poll_interval_ms(RetryPollIntervalMs::try_new(500).unwrap())
            .build();
        assert!(result.is_err());
    }
}
