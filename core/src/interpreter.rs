//! Failure interpretation
//!
//! A `FailureInterpreter` looks at a failed call and decides whether it
//! should count toward tripping the breaker. Implementations in this crate:
//!
//! - `DefaultInterpreter`: N qualifying failures within a time window
//! - `PercentInterpreter`: error percentage of the request volume within a window
//! - `KindInterpreter`: only configured failure kinds count, with a frequency threshold
//! - `PredicateInterpreter`: a caller-supplied closure

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Context provided to interpreters for failure evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The error that occurred (can be downcast to specific types)
    pub error: &'a dyn Any,
    /// How long the failed call ran
    pub elapsed: Duration,
}

impl<'a> FailureContext<'a> {
    pub fn new(circuit_name: &'a str, error: &'a dyn Any, elapsed: Duration) -> Self {
        Self {
            circuit_name,
            error,
            elapsed,
        }
    }

    /// The failure as `T`, if that is its concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.error.downcast_ref::<T>()
    }
}

/// Outcome of interpreting one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Counts, and the threshold is reached: trip the breaker
    Trip,
    /// Counts, but the threshold is not reached yet
    Tolerate,
    /// Not a qualifying failure; pass it through without counting it
    Ignore,
}

impl Verdict {
    pub fn should_trip(self) -> bool {
        self == Self::Trip
    }
}

/// Trait for interpreting failures - determines if an error should trip the circuit
///
/// # Examples
///
/// ```rust
/// use fuse_machines::{FailureContext, FailureInterpreter, Verdict};
///
/// #[derive(Debug)]
/// struct SlowCallsOnly;
///
/// impl FailureInterpreter for SlowCallsOnly {
///     fn interpret(&self, ctx: &FailureContext<'_>) -> Verdict {
///         if ctx.elapsed.as_millis() > 500 {
///             Verdict::Trip
///         } else {
///             Verdict::Ignore
///         }
///     }
/// }
/// ```
pub trait FailureInterpreter: Send + Sync + std::fmt::Debug {
    fn interpret(&self, ctx: &FailureContext<'_>) -> Verdict;

    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        self.interpret(ctx).should_trip()
    }
}

type Predicate = Arc<dyn Fn(&FailureContext<'_>) -> bool + Send + Sync>;

/// A set of failure kinds, each described by a predicate
///
/// `of::<T>()` / `with_type::<T>()` match the exact concrete error type;
/// `when(..)` / `with_predicate(..)` accept any classification the caller
/// wants. An empty filter matches nothing.
#[derive(Clone, Default)]
pub struct FailureFilter {
    predicates: Vec<Predicate>,
}

impl FailureFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter matching failures whose concrete type is `T`
    pub fn of<T: Any>() -> Self {
        Self::new().with_type::<T>()
    }

    /// Filter matching failures accepted by `predicate`
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self::new().with_predicate(predicate)
    }

    pub fn with_type<T: Any>(self) -> Self {
        self.with_predicate(|ctx| ctx.error.is::<T>())
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn matches(&self, ctx: &FailureContext<'_>) -> bool {
        self.predicates.iter().any(|predicate| predicate(ctx))
    }
}

impl std::fmt::Debug for FailureFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureFilter")
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

/// Predicate-based interpreter using a closure
///
/// Trips when the predicate returns `true`, ignores the failure otherwise.
pub struct PredicateInterpreter<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateInterpreter<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureInterpreter for PredicateInterpreter<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn interpret(&self, ctx: &FailureContext<'_>) -> Verdict {
        if (self.predicate)(ctx) {
            Verdict::Trip
        } else {
            Verdict::Ignore
        }
    }
}

impl<F> std::fmt::Debug for PredicateInterpreter<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateInterpreter")
            .field("predicate", &"<closure>")
            .finish()
    }
}
