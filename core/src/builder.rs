//! Builder API for ergonomic circuit breaker configuration

use crate::{
    callbacks::{Callbacks, Transition},
    circuit::{CircuitBreaker, CircuitContext, DEFAULT_RESET_MILLIS},
    clock::{Clock, SystemClock},
    errors::ConfigError,
    interpreter::FailureInterpreter,
    recovery::{FixedInterval, RecoveryPolicy, Skeptic, SkepticSettings},
};
use std::sync::Arc;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    name: String,
    reset_millis: u64,
    jitter_factor: f64,
    recovery: Option<Arc<dyn RecoveryPolicy>>,
    clock: Option<Arc<dyn Clock>>,
    failure_interpreter: Option<Arc<dyn FailureInterpreter>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reset_millis: DEFAULT_RESET_MILLIS,
            jitter_factor: 0.0,
            recovery: None,
            clock: None,
            failure_interpreter: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Set the fixed cooldown before an open circuit admits a trial call
    pub fn reset_millis(mut self, millis: u64) -> Self {
        self.reset_millis = millis;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    /// Use a custom recovery policy instead of a fixed interval
    ///
    /// Overrides `reset_millis` and `jitter_factor`.
    pub fn recovery(mut self, recovery: Arc<dyn RecoveryPolicy>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Recover with exponential skepticism
    pub fn skeptic(self, settings: SkepticSettings) -> Result<Self, ConfigError> {
        let skeptic = Skeptic::new(settings)?;
        Ok(self.recovery(Arc::new(skeptic)))
    }

    /// Set the time source (defaults to a monotonic system clock)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set a failure interpreter to decide which errors trip the circuit
    ///
    /// Without one, every failure trips.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fuse_machines::{CircuitBreaker, PredicateInterpreter};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .failure_interpreter(Arc::new(PredicateInterpreter::new(|ctx| {
    ///         // Only trip on slow errors
    ///         ctx.elapsed > Duration::from_secs(1)
    ///     })))
    ///     .build();
    ///
    /// assert!(circuit.failure_interpreter().is_some());
    /// ```
    pub fn failure_interpreter(mut self, interpreter: Arc<dyn FailureInterpreter>) -> Self {
        self.failure_interpreter = Some(interpreter);
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Add a listener that receives every state transition
    pub fn listener<F>(mut self, f: F) -> Self
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        self.callbacks.add_listener(Arc::new(f));
        self
    }

    /// Build the circuit breaker
    pub fn build(self) -> CircuitBreaker {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        let recovery = self.recovery.unwrap_or_else(|| {
            Arc::new(FixedInterval::with_jitter(
                self.reset_millis,
                self.jitter_factor,
            ))
        });

        let context = CircuitContext {
            name: self.name,
            clock,
            recovery,
        };

        CircuitBreaker::with_parts(context, self.callbacks, self.failure_interpreter)
    }
}

impl std::fmt::Debug for CircuitBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBuilder")
            .field("name", &self.name)
            .field("reset_millis", &self.reset_millis)
            .field("jitter_factor", &self.jitter_factor)
            .field("recovery", &self.recovery)
            .field("failure_interpreter", &self.failure_interpreter)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::recovery::RecoveryMode;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_builder_defaults() {
        let circuit = CircuitBuilder::new("test").build();

        assert_eq!(circuit.state_name(), "Closed");
        assert!(circuit.is_closed());
        assert_eq!(circuit.recovery().mode(), RecoveryMode::TrialGate);
        assert_eq!(circuit.recovery().cooldown_millis(), DEFAULT_RESET_MILLIS);
        assert!(circuit.failure_interpreter().is_none());
    }

    #[test]
    fn test_builder_custom_reset() {
        let circuit = CircuitBuilder::new("test").reset_millis(250).build();

        assert_eq!(circuit.recovery().cooldown_millis(), 250);
    }

    #[test]
    fn test_builder_with_skeptic() {
        let circuit = CircuitBuilder::new("test")
            .skeptic(SkepticSettings::default())
            .expect("valid settings")
            .build();

        assert_eq!(circuit.recovery().mode(), RecoveryMode::Direct);

        let invalid = CircuitBuilder::new("test").skeptic(SkepticSettings {
            max_level: 99,
            ..SkepticSettings::default()
        });
        assert!(invalid.is_err());
    }

    #[test]
    fn test_builder_with_callbacks() {
        let opened = Arc::new(AtomicBool::new(false));
        let opened_clone = opened.clone();
        let transitions = Arc::new(AtomicUsize::new(0));
        let transitions_clone = transitions.clone();

        let circuit = CircuitBuilder::new("test")
            .on_open(move |_name| {
                opened_clone.store(true, Ordering::SeqCst);
            })
            .listener(move |_transition| {
                transitions_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        // Trigger a failure to open circuit
        let _ = circuit.invoke(|| Err::<(), _>("error 1"));

        // Callback should have been triggered
        assert!(opened.load(Ordering::SeqCst));
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_builder_half_open_and_close_callbacks() {
        let clock = Arc::new(ManualClock::new(0));
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let half_open = events.clone();
        let closed = events.clone();

        let circuit = CircuitBuilder::new("test")
            .reset_millis(10)
            .clock(clock.clone())
            .on_half_open(move |name| half_open.lock().push(format!("half_open:{name}")))
            .on_close(move |name| closed.lock().push(format!("close:{name}")))
            .build();

        circuit.trip();
        clock.advance_millis(10);
        circuit.invoke(|| Ok::<_, &str>(())).expect("trial admitted");

        assert_eq!(*events.lock(), vec!["half_open:test", "close:test"]);
    }
}
