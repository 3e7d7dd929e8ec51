//! Request volume tracking
//!
//! A `RequestCounter` is usually shared between the code it protects (which
//! wraps calls through it) and a `PercentInterpreter` reading its totals.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the running total of requests seen so far
pub trait RequestVolume: Send + Sync + std::fmt::Debug {
    /// Requests seen since creation; must never decrease
    fn total_requests(&self) -> u64;
}

/// Thread-safe total/success/failure request counter
#[derive(Debug, Default)]
pub struct RequestCounter {
    /// Lifetime total, untouched by `sample_and_reset`
    lifetime: AtomicU64,
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` and count its outcome once it has finished
    pub fn invoke<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let result = operation();
        match &result {
            Ok(_) => self.mark_success(),
            Err(_) => self.mark_failure(),
        }
        result
    }

    pub fn mark_success(&self) {
        self.successes.fetch_add(1, Ordering::AcqRel);
        self.count_request();
    }

    pub fn mark_failure(&self) {
        self.failures.fetch_add(1, Ordering::AcqRel);
        self.count_request();
    }

    fn count_request(&self) {
        self.total.fetch_add(1, Ordering::AcqRel);
        self.lifetime.fetch_add(1, Ordering::AcqRel);
    }

    /// `[total, successes, failures]`
    pub fn sample(&self) -> [u64; 3] {
        [
            self.total.load(Ordering::Acquire),
            self.successes.load(Ordering::Acquire),
            self.failures.load(Ordering::Acquire),
        ]
    }

    /// Same as `sample()`, then zero every count
    ///
    /// `total_requests()` keeps counting across resets.
    pub fn sample_and_reset(&self) -> [u64; 3] {
        [
            self.total.swap(0, Ordering::AcqRel),
            self.successes.swap(0, Ordering::AcqRel),
            self.failures.swap(0, Ordering::AcqRel),
        ]
    }
}

impl RequestVolume for RequestCounter {
    fn total_requests(&self) -> u64 {
        self.lifetime.load(Ordering::Acquire)
    }
}
