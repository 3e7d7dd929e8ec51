//! Count-threshold-in-window interpretation
//!
//! The default policy: a failure qualifies unless it is ignored (or, when a
//! target filter is set, unless it is targeted). Without a window every
//! qualifying failure trips. With `limit > 0` and `window_millis > 0` the
//! breaker trips on the `(limit + 1)`-th qualifying failure inside the window.

use crate::clock::{Clock, SystemClock};
use crate::errors::ConfigError;
use crate::interpreter::{FailureContext, FailureFilter, FailureInterpreter, Verdict};
use crate::window::WindowedEventCounter;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Trips after more than `limit` qualifying failures within `window_millis`
#[derive(Debug)]
pub struct DefaultInterpreter {
    ignore: FailureFilter,
    target: FailureFilter,
    limit: AtomicUsize,
    counter: Option<WindowedEventCounter>,
}

impl DefaultInterpreter {
    /// Interpreter that trips on every failure
    pub fn new() -> Self {
        Self {
            ignore: FailureFilter::new(),
            target: FailureFilter::new(),
            limit: AtomicUsize::new(0),
            counter: None,
        }
    }

    pub fn builder() -> DefaultInterpreterBuilder {
        DefaultInterpreterBuilder::default()
    }

    /// Tolerated failures per window; 0 when no window is configured
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    pub fn window_millis(&self) -> Option<u64> {
        self.counter.as_ref().map(WindowedEventCounter::window_millis)
    }

    pub fn has_window(&self) -> bool {
        self.counter.is_some() && self.limit() > 0
    }

    /// Change the tolerated failure count of a windowed interpreter
    ///
    /// The backing counter is resized to `limit + 1`. A limit of zero makes
    /// every qualifying failure trip. Interpreters built without a window
    /// ignore the new limit.
    pub fn set_limit(&self, limit: usize) -> Result<(), ConfigError> {
        if let Some(counter) = &self.counter {
            counter.set_capacity(limit.saturating_add(1))?;
            self.limit.store(limit, Ordering::Release);
        }
        Ok(())
    }

    /// Change the window length of a windowed interpreter
    pub fn set_window_millis(&self, window_millis: u64) -> Result<(), ConfigError> {
        match &self.counter {
            Some(counter) => counter.set_window_millis(window_millis),
            None => Ok(()),
        }
    }

    fn qualifies(&self, ctx: &FailureContext<'_>) -> bool {
        if !self.target.is_empty() {
            return self.target.matches(ctx);
        }
        !self.ignore.matches(ctx)
    }
}

impl Default for DefaultInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureInterpreter for DefaultInterpreter {
    fn interpret(&self, ctx: &FailureContext<'_>) -> Verdict {
        if !self.qualifies(ctx) {
            return Verdict::Ignore;
        }

        let limit = self.limit();
        match &self.counter {
            Some(counter) if limit > 0 => {
                counter.mark();
                if counter.tally() > limit {
                    Verdict::Trip
                } else {
                    Verdict::Tolerate
                }
            }
            _ => Verdict::Trip,
        }
    }
}

/// Builder for `DefaultInterpreter`
#[derive(Debug, Default)]
pub struct DefaultInterpreterBuilder {
    ignore: FailureFilter,
    target: FailureFilter,
    limit: usize,
    window_millis: u64,
    clock: Option<Arc<dyn Clock>>,
}

impl DefaultInterpreterBuilder {
    /// Never count failures of type `T`
    pub fn ignore<T: Any>(mut self) -> Self {
        self.ignore = self.ignore.with_type::<T>();
        self
    }

    /// Never count failures accepted by `predicate`
    pub fn ignore_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.ignore = self.ignore.with_predicate(predicate);
        self
    }

    /// Count only failures of type `T` (and other targets)
    pub fn target<T: Any>(mut self) -> Self {
        self.target = self.target.with_type::<T>();
        self
    }

    /// Count only failures accepted by `predicate` (and other targets)
    pub fn target_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.target = self.target.with_predicate(predicate);
        self
    }

    /// Qualifying failures tolerated within the window
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn window_millis(mut self, window_millis: u64) -> Self {
        self.window_millis = window_millis;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<DefaultInterpreter, ConfigError> {
        if !self.ignore.is_empty() && !self.target.is_empty() {
            return Err(ConfigError::ConflictingFilters);
        }

        let windowed = self.limit > 0 && self.window_millis > 0;
        let counter = if windowed {
            let clock = self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock::new()));
            Some(WindowedEventCounter::with_clock(
                self.limit.saturating_add(1),
                self.window_millis,
                clock,
            )?)
        } else {
            None
        };

        Ok(DefaultInterpreter {
            ignore: self.ignore,
            target: self.target,
            limit: AtomicUsize::new(if windowed { self.limit } else { 0 }),
            counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    #[derive(Debug)]
    struct Timeout;

    #[derive(Debug)]
    struct BadRequest;

    fn ctx<'a>(error: &'a dyn Any) -> FailureContext<'a> {
        FailureContext::new("test", error, Duration::ZERO)
    }

    fn windowed(limit: usize, window_millis: u64) -> (Arc<ManualClock>, DefaultInterpreter) {
        let clock = Arc::new(ManualClock::new(0));
        let interpreter = DefaultInterpreter::builder()
            .limit(limit)
            .window_millis(window_millis)
            .clock(clock.clone())
            .build()
            .expect("valid interpreter");
        (clock, interpreter)
    }

    #[test]
    fn test_without_window_every_failure_trips() {
        let interpreter = DefaultInterpreter::new();

        assert!(!interpreter.has_window());
        assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Trip);
    }

    #[test]
    fn test_third_failure_in_window_trips_with_limit_two() {
        let (clock, interpreter) = windowed(2, 1_000);

        assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Tolerate);
        clock.advance_millis(100);
        assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Tolerate);
        clock.advance_millis(100);
        assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Trip);
    }

    #[test]
    fn test_failures_outside_window_do_not_accumulate() {
        let (clock, interpreter) = windowed(2, 1_000);

        interpreter.interpret(&ctx(&Timeout));
        interpreter.interpret(&ctx(&Timeout));
        clock.advance_millis(1_001);

        assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Tolerate);
    }

    #[test]
    fn test_ignored_failures_never_count() {
        let interpreter = DefaultInterpreter::builder()
            .ignore::<BadRequest>()
            .build()
            .expect("valid interpreter");

        assert_eq!(interpreter.interpret(&ctx(&BadRequest)), Verdict::Ignore);
        assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Trip);
    }

    #[test]
    fn test_ignored_failures_are_not_marked_in_window() {
        let clock = Arc::new(ManualClock::new(0));
        let interpreter = DefaultInterpreter::builder()
            .ignore::<BadRequest>()
            .limit(1)
            .window_millis(1_000)
            .clock(clock)
            .build()
            .expect("valid interpreter");

        for _ in 0..5 {
            interpreter.interpret(&ctx(&BadRequest));
        }
        assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Tolerate);
        assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Trip);
    }

    #[test]
    fn test_target_restricts_counted_failures() {
        let interpreter = DefaultInterpreter::builder()
            .target::<Timeout>()
            .target_when(|ctx| ctx.downcast_ref::<&str>() == Some(&"connection reset"))
            .build()
            .expect("valid interpreter");

        assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Trip);
        assert_eq!(
            interpreter.interpret(&ctx(&"connection reset")),
            Verdict::Trip
        );
        assert_eq!(interpreter.interpret(&ctx(&BadRequest)), Verdict::Ignore);
    }

    #[test]
    fn test_ignore_and_target_are_exclusive() {
        let result = DefaultInterpreter::builder()
            .ignore::<BadRequest>()
            .target::<Timeout>()
            .build();

        assert_eq!(result.unwrap_err(), ConfigError::ConflictingFilters);
    }

    #[test]
    fn test_limit_without_window_trips_immediately() {
        let interpreter = DefaultInterpreter::builder()
            .limit(3)
            .build()
            .expect("valid interpreter");

        assert_eq!(interpreter.limit(), 0);
        assert_eq!(interpreter.window_millis(), None);
        assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Trip);
    }

    #[test]
    fn test_set_limit_resizes_window() {
        let (_clock, interpreter) = windowed(1, 1_000);

        interpreter.set_limit(3).expect("valid limit");
        assert_eq!(interpreter.limit(), 3);

        for _ in 0..3 {
            assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Tolerate);
        }
        assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Trip);

        interpreter.set_limit(0).expect("valid limit");
        assert!(!interpreter.has_window());
        assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Trip);
    }

    #[test]
    fn test_set_window_millis() {
        let (clock, interpreter) = windowed(1, 1_000);

        interpreter.interpret(&ctx(&Timeout));
        interpreter.set_window_millis(10).expect("valid window");
        assert_eq!(interpreter.window_millis(), Some(10));

        clock.advance_millis(11);
        assert_eq!(interpreter.interpret(&ctx(&Timeout)), Verdict::Tolerate);
        assert!(interpreter.set_window_millis(0).is_err());
    }
}
