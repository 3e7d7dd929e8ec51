//! Time sources for breakers, counters and interpreters
//!
//! - `SystemClock`: monotonic milliseconds since creation (immune to NTP skew)
//! - `ManualClock`: externally driven time for deterministic tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Supplies the current time in milliseconds
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds. Only differences between readings matter.
    fn now_millis(&self) -> u64;
}

/// Monotonic clock anchored at its creation instant
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start_time: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.start_time.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Clock that only moves when told to
///
/// # Example
///
/// ```rust
/// use fuse_machines::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(clock.now_millis(), 1_250);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.advance_millis(u64::try_from(by.as_millis()).unwrap_or(u64::MAX));
    }

    pub fn advance_millis(&self, millis: u64) {
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| {
                Some(now.saturating_add(millis))
            });
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();

        let time1 = clock.now_millis();
        std::thread::sleep(Duration::from_millis(10));
        let time2 = clock.now_millis();

        assert!(time2 >= time1 + 10);
    }

    #[test]
    fn test_manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(500);
        assert_eq!(clock.now_millis(), 500);

        clock.advance_millis(20);
        assert_eq!(clock.now_millis(), 520);

        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn test_manual_clock_saturates() {
        let clock = ManualClock::new(u64::MAX - 1);
        clock.advance_millis(10);
        assert_eq!(clock.now_millis(), u64::MAX);
    }
}
