//! Percentage-of-requests-in-window interpretation
//!
//! Every candidate failure records its timestamp together with a snapshot of
//! the shared request total. Entries older than the window are evicted; the
//! request snapshot of the newest evicted entry becomes the high-water mark,
//! so `total - high_water_mark` is the request volume inside the window.

use crate::clock::{Clock, SystemClock};
use crate::errors::ConfigError;
use crate::interpreter::{FailureContext, FailureFilter, FailureInterpreter, Verdict};
use crate::requests::RequestVolume;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
struct ErrorLog {
    /// Failure timestamps, oldest first
    error_times: VecDeque<u64>,
    /// Request total observed with each failure, parallel to `error_times`
    request_counts: VecDeque<u64>,
    high_water_mark: u64,
}

impl ErrorLog {
    fn record(&mut self, now: u64, requests: u64) {
        self.error_times.push_back(now);
        self.request_counts.push_back(requests);
    }

    /// The request source went backwards, so every snapshot is stale
    fn is_behind(&self, requests: u64) -> bool {
        requests < self.high_water_mark
            || self.request_counts.back().is_some_and(|&last| requests < last)
    }

    fn clear(&mut self) {
        self.error_times.clear();
        self.request_counts.clear();
        self.high_water_mark = 0;
    }

    fn evict_before(&mut self, cutoff: u64) {
        while self.error_times.front().is_some_and(|&time| time < cutoff) {
            self.error_times.pop_front();
            if let Some(requests) = self.request_counts.pop_front() {
                self.high_water_mark = requests;
            }
        }
    }
}

/// Trips when failures make up at least `percent` of the requests seen in the window
///
/// `request_threshold` keeps tiny samples (a single failing first request)
/// from tripping the breaker. A window with no requests at all never trips,
/// whatever the threshold: the percentage is undefined there.
#[derive(Debug)]
pub struct PercentInterpreter {
    ignore: FailureFilter,
    percent: u32,
    window_millis: u64,
    request_threshold: u64,
    requests: Arc<dyn RequestVolume>,
    clock: Arc<dyn Clock>,
    log: Mutex<ErrorLog>,
}

impl PercentInterpreter {
    pub fn builder(requests: Arc<dyn RequestVolume>) -> PercentInterpreterBuilder {
        PercentInterpreterBuilder {
            requests,
            ignore: FailureFilter::new(),
            percent: 0,
            window_millis: 0,
            request_threshold: 0,
            clock: None,
        }
    }

    pub fn percent(&self) -> u32 {
        self.percent
    }

    pub fn window_millis(&self) -> u64 {
        self.window_millis
    }

    pub fn request_threshold(&self) -> u64 {
        self.request_threshold
    }

    pub fn has_window(&self) -> bool {
        self.percent > 0 && self.window_millis > 0
    }

    /// Failures currently inside the window
    pub fn errors_in_window(&self) -> usize {
        let cutoff = self.clock.now_millis().saturating_sub(self.window_millis);
        let mut log = self.log.lock();
        log.evict_before(cutoff);
        log.error_times.len()
    }
}

impl FailureInterpreter for PercentInterpreter {
    fn interpret(&self, ctx: &FailureContext<'_>) -> Verdict {
        if self.ignore.matches(ctx) {
            return Verdict::Ignore;
        }
        if !self.has_window() {
            return Verdict::Trip;
        }

        let now = self.clock.now_millis();
        let (errors, window_requests) = {
            let mut log = self.log.lock();
            let requests = self.requests.total_requests();
            if log.is_behind(requests) {
                tracing::debug!(
                    circuit = %ctx.circuit_name,
                    requests,
                    high_water_mark = log.high_water_mark,
                    "request volume went backwards, restarting error log"
                );
                log.clear();
            }
            log.record(now, requests);
            log.evict_before(now.saturating_sub(self.window_millis));
            let errors = log.error_times.len() as u64;
            (errors, requests.saturating_sub(log.high_water_mark))
        };

        let over_percent =
            errors.saturating_mul(100) >= u64::from(self.percent).saturating_mul(window_requests);
        if window_requests >= self.request_threshold && window_requests > 0 && over_percent {
            Verdict::Trip
        } else {
            tracing::debug!(
                circuit = %ctx.circuit_name,
                errors,
                window_requests,
                percent = self.percent,
                "failure below percentage threshold"
            );
            Verdict::Tolerate
        }
    }
}

/// Builder for `PercentInterpreter`
#[derive(Debug)]
pub struct PercentInterpreterBuilder {
    requests: Arc<dyn RequestVolume>,
    ignore: FailureFilter,
    percent: u32,
    window_millis: u64,
    request_threshold: u64,
    clock: Option<Arc<dyn Clock>>,
}

impl PercentInterpreterBuilder {
    /// Never count failures of type `T`
    pub fn ignore<T: Any>(mut self) -> Self {
        self.ignore = self.ignore.with_type::<T>();
        self
    }

    pub fn ignore_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.ignore = self.ignore.with_predicate(predicate);
        self
    }

    /// Error percentage (0..=100) that trips the breaker
    pub fn percent(mut self, percent: u32) -> Self {
        self.percent = percent;
        self
    }

    pub fn window_millis(mut self, window_millis: u64) -> Self {
        self.window_millis = window_millis;
        self
    }

    /// Minimum request volume in the window before the percentage is considered
    ///
    /// Even with a threshold of 0 at least one request must be in the window;
    /// failures the shared counter never saw cannot trip the breaker.
    pub fn request_threshold(mut self, request_threshold: u64) -> Self {
        self.request_threshold = request_threshold;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<PercentInterpreter, ConfigError> {
        if self.percent > 100 {
            return Err(ConfigError::PercentOutOfRange(self.percent));
        }

        Ok(PercentInterpreter {
            ignore: self.ignore,
            percent: self.percent,
            window_millis: self.window_millis,
            request_threshold: self.request_threshold,
            requests: self.requests,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock::new())),
            log: Mutex::new(ErrorLog::default()),
        })
    }
}
