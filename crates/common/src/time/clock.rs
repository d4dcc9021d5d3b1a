//! Wall-clock abstraction for deterministic tests
//!
//! Token expiry is tracked as absolute epoch milliseconds, so the clock only
//! needs to answer "what time is it now". [`MockClock`] lets tests sit exactly
//! on an expiry boundary without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Trait for time operations to enable deterministic testing
pub trait Clock: Send + Sync + 'static {
    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> i64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or_default()
    }
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Implement Clock for Arc<T> where T: Clock for convenient cloning
impl<T: Clock> Clock for Arc<T> {
    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }

    fn millis_since_epoch(&self) -> i64 {
        (**self).millis_since_epoch()
    }
}

/// Mock clock for deterministic testing
///
/// Clones share the same underlying time, so a test can keep one handle and
/// advance the clock seen by the component under test.
#[derive(Debug, Clone)]
pub struct MockClock {
    now_ms: Arc<AtomicI64>,
}

impl MockClock {
    /// Create a mock clock frozen at the current wall-clock time
    pub fn new() -> Self {
        Self::at_millis(SystemClock.millis_since_epoch())
    }

    /// Create a mock clock frozen at a specific epoch-millisecond instant
    pub fn at_millis(now_ms: i64) -> Self {
        Self { now_ms: Arc::new(AtomicI64::new(now_ms)) }
    }

    /// Advance the mock clock by milliseconds
    pub fn advance_millis(&self, millis: i64) {
        self.now_ms.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the mock clock to a specific epoch-millisecond instant
    pub fn set_millis(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn system_time(&self) -> SystemTime {
        let millis = u64::try_from(self.millis_since_epoch()).unwrap_or_default();
        UNIX_EPOCH + std::time::Duration::from_millis(millis)
    }

    fn millis_since_epoch(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates `MockClock` time control.
    ///
    /// Assertions:
    /// - Confirms clones observe `advance_millis` on the original.
    /// - Confirms `set_millis` pins the clock and `system_time` agrees.
    #[test]
    fn test_mock_clock_shared_advance() {
        let clock = MockClock::at_millis(1_000);
        let observer = clock.clone();

        clock.advance_millis(250);
        assert_eq!(observer.millis_since_epoch(), 1_250);

        clock.set_millis(5_000);
        assert_eq!(observer.millis_since_epoch(), 5_000);
        assert_eq!(
            observer.system_time().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).ok(),
            Some(5_000)
        );
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.millis_since_epoch() > 1_577_836_800_000);
    }

    #[test]
    fn test_arc_clock_delegates() {
        let clock = Arc::new(MockClock::at_millis(42));
        assert_eq!(clock.millis_since_epoch(), 42);
    }
}
