//! Failure-kind classification with a frequency threshold

use crate::clock::{Clock, SystemClock};
use crate::errors::ConfigError;
use crate::interpreter::{FailureContext, FailureFilter, FailureInterpreter, Verdict};
use crate::window::WindowedEventCounter;
use std::any::Any;
use std::sync::Arc;

/// Counts only failures of the configured kinds
///
/// Any other failure gets `Verdict::Ignore`: it reaches the caller untouched
/// and is never counted. Matching failures trip immediately, or, when a
/// frequency and window are configured, once more than `frequency` of them
/// land inside the window. Below that the verdict is `Verdict::Tolerate`.
#[derive(Debug)]
pub struct KindInterpreter {
    kinds: FailureFilter,
    frequency: usize,
    counter: Option<WindowedEventCounter>,
}

impl KindInterpreter {
    pub fn builder() -> KindInterpreterBuilder {
        KindInterpreterBuilder::default()
    }

    pub fn frequency(&self) -> usize {
        self.frequency
    }

    pub fn window_millis(&self) -> Option<u64> {
        self.counter.as_ref().map(WindowedEventCounter::window_millis)
    }
}

impl FailureInterpreter for KindInterpreter {
    fn interpret(&self, ctx: &FailureContext<'_>) -> Verdict {
        if !self.kinds.matches(ctx) {
            return Verdict::Ignore;
        }

        let Some(counter) = &self.counter else {
            return Verdict::Trip;
        };
        counter.mark();
        if counter.tally() > self.frequency {
            Verdict::Trip
        } else {
            Verdict::Tolerate
        }
    }
}

/// Builder for `KindInterpreter`
#[derive(Debug, Default)]
pub struct KindInterpreterBuilder {
    kinds: FailureFilter,
    frequency: usize,
    window_millis: u64,
    clock: Option<Arc<dyn Clock>>,
}

impl KindInterpreterBuilder {
    /// Count failures whose concrete type is `T`
    pub fn kind<T: Any>(mut self) -> Self {
        self.kinds = self.kinds.with_type::<T>();
        self
    }

    /// Count failures accepted by `predicate`
    pub fn kind_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.kinds = self.kinds.with_predicate(predicate);
        self
    }

    /// Matching failures tolerated within the window
    pub fn frequency(mut self, frequency: usize) -> Self {
        self.frequency = frequency;
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

    pub fn build(self) -> Result<KindInterpreter, ConfigError> {
        if self.kinds.is_empty() {
            return Err(ConfigError::EmptyKinds);
        }

        let counter = if self.frequency > 0 && self.window_millis > 0 {
            let clock = self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock::new()));
            Some(WindowedEventCounter::with_clock(
                self.frequency.saturating_add(1),
                self.window_millis,
                clock,
            )?)
        } else {
            None
        };

        Ok(KindInterpreter {
            kinds: self.kinds,
            frequency: if counter.is_some() { self.frequency } else { 0 },
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
    enum DbError {
        ConnectionLost,
        Deadlock,
    }

    #[derive(Debug)]
    struct ValidationError;

    fn ctx<'a>(error: &'a dyn Any) -> FailureContext<'a> {
        FailureContext::new("db", error, Duration::ZERO)
    }

    #[test]
    fn test_requires_a_kind() {
        assert_eq!(
            KindInterpreter::builder().build().unwrap_err(),
            ConfigError::EmptyKinds
        );
    }

    #[test]
    fn test_non_matching_failures_pass_through() {
        let interpreter = KindInterpreter::builder()
            .kind::<DbError>()
            .build()
            .expect("valid interpreter");

        assert_eq!(interpreter.interpret(&ctx(&ValidationError)), Verdict::Ignore);
        assert_eq!(
            interpreter.interpret(&ctx(&DbError::Deadlock)),
            Verdict::Trip
        );
    }

    #[test]
    fn test_frequency_threshold_within_window() {
        let clock = Arc::new(ManualClock::new(0));
        let interpreter = KindInterpreter::builder()
            .kind::<DbError>()
            .frequency(2)
            .window_millis(500)
            .clock(clock.clone())
            .build()
            .expect("valid interpreter");

        assert_eq!(interpreter.frequency(), 2);
        assert_eq!(interpreter.window_millis(), Some(500));

        let lost = DbError::ConnectionLost;
        assert_eq!(interpreter.interpret(&ctx(&lost)), Verdict::Tolerate);
        assert_eq!(interpreter.interpret(&ctx(&ValidationError)), Verdict::Ignore);
        assert_eq!(interpreter.interpret(&ctx(&lost)), Verdict::Tolerate);
        assert_eq!(interpreter.interpret(&ctx(&lost)), Verdict::Trip);

        clock.advance_millis(501);
        assert_eq!(interpreter.interpret(&ctx(&lost)), Verdict::Tolerate);
    }

    #[test]
    fn test_predicate_kinds() {
        let interpreter = KindInterpreter::builder()
            .kind_when(|ctx| matches!(ctx.downcast_ref::<DbError>(), Some(DbError::Deadlock)))
            .build()
            .expect("valid interpreter");

        assert_eq!(
            interpreter.interpret(&ctx(&DbError::Deadlock)),
            Verdict::Trip
        );
        assert_eq!(
            interpreter.interpret(&ctx(&DbError::ConnectionLost)),
            Verdict::Ignore
        );
    }
}
