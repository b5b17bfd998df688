//! Time abstraction layer for testable time-dependent operations
//!
//! The router's retry, deadline, and presence logic all key off a
//! millisecond wall clock. Injecting the clock as a trait object lets
//! tests drive expiry and backoff deterministically without sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current wall-clock time in milliseconds since the epoch.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds.
    #[must_use]
    fn now_ms(&self) -> u64;
}

/// Real system clock for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for tests.
///
/// Starts at an arbitrary fixed instant and only moves when told to,
/// so timeout and expiry paths can be exercised at full speed.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Creates a manual clock starting at the given instant.
    #[must_use]
    pub fn starting_at(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    /// Advances the clock by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jumps the clock to an absolute instant.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Shared clock handle used throughout the router.
pub type SharedClock = Arc<dyn Clock>;

/// Creates the production clock.
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock::new())
}
