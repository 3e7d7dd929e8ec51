//! Sliding-window event counting
//!
//! `WindowedEventCounter` answers "how many events happened within the last
//! `window_millis`" while retaining at most `capacity` timestamps.

use crate::clock::{Clock, SystemClock};
use crate::errors::ConfigError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Shared event counter contract. Implementations must be internally synchronized.
pub trait EventCounter: Send + Sync + std::fmt::Debug {
    /// Record an event happening now
    fn mark(&self);

    /// Number of events still inside the window
    fn tally(&self) -> usize;
}

#[derive(Debug)]
struct Window {
    capacity: usize,
    window_millis: u64,
    /// Event timestamps, oldest first
    stamps: VecDeque<u64>,
}

impl Window {
    fn evict_expired(&mut self, now: u64) {
        let cutoff = now.saturating_sub(self.window_millis);
        while self.stamps.front().is_some_and(|&stamp| stamp < cutoff) {
            self.stamps.pop_front();
        }
    }

    fn evict_overflow(&mut self) {
        while self.stamps.len() > self.capacity {
            self.stamps.pop_front();
        }
    }
}

/// Fixed-capacity ring of event timestamps
///
/// On overflow the oldest timestamp is dropped rather than the new one.
///
/// # Example
///
/// ```rust
/// use fuse_machines::{ManualClock, WindowedEventCounter};
/// use std::sync::Arc;
///
/// let clock = Arc::new(ManualClock::new(0));
/// let counter = WindowedEventCounter::with_clock(3, 5, clock.clone()).unwrap();
///
/// counter.mark();
/// counter.mark();
/// assert_eq!(counter.tally(), 2);
///
/// clock.advance_millis(6);
/// assert_eq!(counter.tally(), 0);
/// ```
#[derive(Debug)]
pub struct WindowedEventCounter {
    inner: Mutex<Window>,
    clock: Arc<dyn Clock>,
}

impl WindowedEventCounter {
    /// Create a counter backed by the system clock
    pub fn new(capacity: usize, window_millis: u64) -> Result<Self, ConfigError> {
        Self::with_clock(capacity, window_millis, Arc::new(SystemClock::new()))
    }

    /// Create a counter reading time from `clock`
    pub fn with_clock(
        capacity: usize,
        window_millis: u64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        check_capacity(capacity)?;
        check_window(window_millis)?;

        Ok(Self {
            inner: Mutex::new(Window {
                capacity,
                window_millis,
                stamps: VecDeque::with_capacity(capacity),
            }),
            clock,
        })
    }

    /// Record an event at the current time, dropping the oldest one when full
    pub fn mark(&self) {
        let now = self.clock.now_millis();
        let mut window = self.inner.lock();
        if window.stamps.len() >= window.capacity {
            window.stamps.pop_front();
        }
        window.stamps.push_back(now);
    }

    /// Count events within `[now - window_millis, now]`, evicting anything older
    pub fn tally(&self) -> usize {
        let now = self.clock.now_millis();
        let mut window = self.inner.lock();
        window.evict_expired(now);
        window.stamps.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Change the capacity. Shrinking drops the oldest events immediately.
    pub fn set_capacity(&self, capacity: usize) -> Result<(), ConfigError> {
        check_capacity(capacity)?;
        let mut window = self.inner.lock();
        window.capacity = capacity;
        window.evict_overflow();
        Ok(())
    }

    pub fn window_millis(&self) -> u64 {
        self.inner.lock().window_millis
    }

    /// Change the window length; applies from the next `tally()`
    pub fn set_window_millis(&self, window_millis: u64) -> Result<(), ConfigError> {
        check_window(window_millis)?;
        self.inner.lock().window_millis = window_millis;
        Ok(())
    }

    /// Forget every recorded event
    pub fn clear(&self) {
        self.inner.lock().stamps.clear();
    }
}

impl EventCounter for WindowedEventCounter {
    fn mark(&self) {
        WindowedEventCounter::mark(self);
    }

    fn tally(&self) -> usize {
        WindowedEventCounter::tally(self)
    }
}

fn check_capacity(capacity: usize) -> Result<(), ConfigError> {
    if capacity == 0 {
        return Err(ConfigError::NonPositive { name: "capacity" });
    }
    Ok(())
}

fn check_window(window_millis: u64) -> Result<(), ConfigError> {
    if window_millis == 0 {
        return Err(ConfigError::NonPositive {
            name: "window_millis",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn counter(capacity: usize, window_millis: u64) -> (Arc<ManualClock>, WindowedEventCounter) {
        let clock = Arc::new(ManualClock::new(1_000));
        let counter = WindowedEventCounter::with_clock(capacity, window_millis, clock.clone())
            .expect("valid counter");
        (clock, counter)
    }

    #[test]
    fn test_rejects_zero_capacity_and_window() {
        assert_eq!(
            WindowedEventCounter::new(0, 10).unwrap_err(),
            ConfigError::NonPositive { name: "capacity" }
        );
        assert_eq!(
            WindowedEventCounter::new(3, 0).unwrap_err(),
            ConfigError::NonPositive {
                name: "window_millis"
            }
        );
    }

    #[test]
    fn test_events_expire_after_window() {
        let (clock, counter) = counter(3, 5);

        counter.mark();
        counter.mark();
        counter.mark();
        assert_eq!(counter.tally(), 3);

        clock.advance_millis(6);
        assert_eq!(counter.tally(), 0);
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let (clock, counter) = counter(3, 5);

        counter.mark();
        clock.advance_millis(5);
        assert_eq!(counter.tally(), 1, "event exactly window_millis old still counts");

        clock.advance_millis(1);
        assert_eq!(counter.tally(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let (clock, counter) = counter(2, 10);

        counter.mark();
        clock.advance_millis(4);
        counter.mark();
        counter.mark();
        assert_eq!(counter.tally(), 2);

        // survivors are the two newer marks
        clock.advance_millis(9);
        assert_eq!(counter.tally(), 2);
    }

    #[test]
    fn test_shrinking_capacity_evicts_oldest_immediately() {
        let (clock, counter) = counter(5, 100);

        counter.mark();
        clock.advance_millis(1);
        counter.mark();
        clock.advance_millis(1);
        counter.mark();

        counter.set_capacity(1).expect("valid capacity");
        assert_eq!(counter.capacity(), 1);
        assert_eq!(counter.tally(), 1);

        // the survivor is the newest mark
        clock.advance_millis(99);
        assert_eq!(counter.tally(), 1);
    }

    #[test]
    fn test_growing_capacity_keeps_events() {
        let (_clock, counter) = counter(2, 100);

        counter.mark();
        counter.mark();
        counter.set_capacity(4).expect("valid capacity");
        assert_eq!(counter.tally(), 2);

        counter.mark();
        counter.mark();
        assert_eq!(counter.tally(), 4);
    }

    #[test]
    fn test_set_window_applies_on_next_tally() {
        let (clock, counter) = counter(3, 100);

        counter.mark();
        clock.advance_millis(20);
        assert_eq!(counter.tally(), 1);

        counter.set_window_millis(10).expect("valid window");
        assert_eq!(counter.window_millis(), 10);
        assert_eq!(counter.tally(), 0);

        assert!(counter.set_window_millis(0).is_err());
        assert!(counter.set_capacity(0).is_err());
    }

    #[test]
    fn test_concurrent_marks_never_exceed_capacity() {
        let clock = Arc::new(ManualClock::new(0));
        let counter =
            Arc::new(WindowedEventCounter::with_clock(50, 1_000, clock).expect("valid counter"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        counter.mark();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.tally(), 50);
    }

    #[test]
    fn test_clear_forgets_events() {
        let (_clock, counter) = counter(3, 100);
        counter.mark();
        counter.clear();
        assert_eq!(counter.tally(), 0);
    }
}
