//! Circuit breaker implementation using state machines
//!
//! Every transition is evaluated lazily on the calling thread: there is no
//! background timer. The machine sits behind a single lock that is never
//! held while the wrapped operation runs or while listeners are notified.

use crate::callbacks::{Callbacks, Transition};
use crate::clock::{Clock, SystemClock};
use crate::errors::{CircuitError, RejectReason, Rejection};
use crate::interpreter::{FailureContext, FailureInterpreter, Verdict};
use crate::recovery::{FixedInterval, RecoveryMode, RecoveryPolicy};
use crate::status::{BreakerState, ServiceStatus, Status};
use parking_lot::{Mutex, RwLock};
use state_machines::state_machine;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Cooldown used when none is configured
pub const DEFAULT_RESET_MILLIS: u64 = 15_000;

/// Circuit breaker context - shared data across all states
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub clock: Arc<dyn Clock>,
    pub recovery: Arc<dyn RecoveryPolicy>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            clock: Arc::new(SystemClock::new()),
            recovery: Arc::new(FixedInterval::new(DEFAULT_RESET_MILLIS)),
        }
    }
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("clock", &self.clock)
            .field("recovery", &self.recovery)
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: u64,
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    pub entered_at: u64,
}

// Define the circuit breaker state machine with dynamic mode
state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [cooldown_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            transition: { from: HalfOpen, to: Closed }
        }
        recover {
            guards: [cooldown_elapsed],
            transition: { from: Open, to: Closed }
        }
    }
}

impl Circuit<Open> {
    /// Check if the recovery policy's cooldown has passed since the breaker opened
    fn cooldown_elapsed(&self, ctx: &CircuitContext) -> bool {
        let opened_at = self.state_data_open().map(|d| d.opened_at).unwrap_or(0);
        let elapsed = ctx.clock.now_millis().saturating_sub(opened_at);
        ctx.recovery.cooldown_elapsed(elapsed)
    }
}

/// What the breaker remembers about its most recent trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripCause {
    /// `Debug` rendering of the failure, or a note for manual trips
    pub description: String,
    pub tripped_at_millis: u64,
}

/// Value of the trial slot when no trial holds it
const NO_TRIAL: u64 = 0;

/// Holds the HalfOpen trial slot for the duration of the trial call
///
/// Each claim takes a fresh ticket, and the slot stores the ticket of its
/// holder. The slot is released by the breaker when the trial resolves. If
/// the wrapped operation unwinds instead, dropping the still-armed permit
/// frees the slot so the breaker is not wedged in HalfOpen, but only while
/// the slot still carries this permit's ticket: a permit outlived by a
/// reset or a new trip never releases a later trial's claim.
struct TrialPermit<'a> {
    slot: &'a AtomicU64,
    ticket: u64,
    armed: bool,
}

impl<'a> TrialPermit<'a> {
    fn claim(slot: &'a AtomicU64, tickets: &AtomicU64) -> Option<Self> {
        let ticket = tickets.fetch_add(1, Ordering::Relaxed).wrapping_add(1).max(1);
        slot.compare_exchange(NO_TRIAL, ticket, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                slot,
                ticket,
                armed: true,
            })
    }

    /// Whether this permit still holds the slot
    fn is_current(&self) -> bool {
        self.slot.load(Ordering::Acquire) == self.ticket
    }

    fn resolve(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.slot.compare_exchange(
                self.ticket,
                NO_TRIAL,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}

enum Admission<'a> {
    Normal,
    Trial(TrialPermit<'a>),
}

/// Circuit breaker public API
///
/// All methods take `&self`; share a breaker between threads with `Arc`.
pub struct CircuitBreaker {
    machine: Mutex<DynamicCircuit>,
    context: CircuitContext,
    callbacks: RwLock<Callbacks>,
    interpreter: RwLock<Option<Arc<dyn FailureInterpreter>>>,
    /// Ticket of the trial call in flight, `NO_TRIAL` when free
    trial_slot: AtomicU64,
    trial_tickets: AtomicU64,
    hard_tripped: AtomicBool,
    bypassed: AtomicBool,
    trip_count: AtomicU64,
    last_trip_cause: Mutex<Option<TripCause>>,
}

impl CircuitBreaker {
    /// Create a breaker with a fixed cooldown of `DEFAULT_RESET_MILLIS` (use builder() for more options)
    pub fn new(name: impl Into<String>) -> Self {
        let context = CircuitContext {
            name: name.into(),
            ..CircuitContext::default()
        };
        Self::with_parts(context, Callbacks::new(), None)
    }

    /// Create a circuit breaker from prepared parts (used by the builder and registry)
    pub(crate) fn with_parts(
        context: CircuitContext,
        callbacks: Callbacks,
        interpreter: Option<Arc<dyn FailureInterpreter>>,
    ) -> Self {
        let machine = DynamicCircuit::new(context.clone());

        Self {
            machine: Mutex::new(machine),
            context,
            callbacks: RwLock::new(callbacks),
            interpreter: RwLock::new(interpreter),
            trial_slot: AtomicU64::new(NO_TRIAL),
            trial_tickets: AtomicU64::new(0),
            hard_tripped: AtomicBool::new(false),
            bypassed: AtomicBool::new(false),
            trip_count: AtomicU64::new(0),
            last_trip_cause: Mutex::new(None),
        }
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// Returns `CircuitError::Rejected` without running `operation` when the
    /// breaker is open, hard-tripped, or half-open with its trial slot taken.
    /// Otherwise the operation runs and its own failure comes back untouched
    /// as `CircuitError::Execution`.
    pub fn invoke<T, E, F>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        E: Debug + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        if self.is_bypassed() {
            return operation().map_err(CircuitError::Execution);
        }

        let mut pending = Vec::new();
        let admission = self.admit(&mut pending);
        self.notify(&pending);
        let admission = admission.map_err(|reason| Rejection {
            circuit: self.context.name.clone(),
            reason,
        })?;

        let started = self.now();
        match operation() {
            Ok(value) => {
                self.record_success(admission);
                Ok(value)
            }
            Err(error) => {
                let elapsed = Duration::from_millis(self.now().saturating_sub(started));
                self.record_failure(admission, &error, elapsed);
                Err(CircuitError::Execution(error))
            }
        }
    }

    /// Like `invoke`, translating rejections into the operation's own error type
    pub fn invoke_mapped<T, E, F, M>(&self, operation: F, map: M) -> Result<T, E>
    where
        E: Debug + 'static,
        F: FnOnce() -> Result<T, E>,
        M: FnOnce(Rejection) -> E,
    {
        self.invoke(operation).map_err(|e| e.map_rejection(map))
    }

    /// Force the breaker open
    ///
    /// Counts as a trip even when the breaker is already open, and restarts
    /// the cooldown.
    pub fn trip(&self) {
        self.trip_manually("tripped manually");
    }

    /// Open the breaker and keep it open until `reset()`, regardless of elapsed time
    pub fn trip_hard(&self) {
        self.hard_tripped.store(true, Ordering::Release);
        tracing::info!(circuit = %self.context.name, "circuit hard-tripped");
        self.trip_manually("tripped hard");
    }

    /// Return to Closed and clear the hard-trip flag
    ///
    /// The trip count, the last trip cause, bypass, and the recovery
    /// policy's accumulated state are kept.
    pub fn reset(&self) {
        let now = self.now();
        let mut pending = Vec::new();
        {
            let mut machine = self.machine.lock();
            let from = BreakerState::from_name(machine.current_state());

            // Recreate machine in Closed state
            *machine = DynamicCircuit::new(self.context.clone());
            self.hard_tripped.store(false, Ordering::Release);
            self.trial_slot.store(NO_TRIAL, Ordering::Release);
            self.context.recovery.on_close(now);

            tracing::info!(circuit = %self.context.name, from = %from, "circuit reset");
            if from != BreakerState::Closed {
                pending.push(self.transition(&machine, from, BreakerState::Closed, now));
            }
        }
        self.notify(&pending);
    }

    /// Replace the failure interpreter; without one every failure trips
    pub fn set_failure_interpreter(&self, interpreter: Arc<dyn FailureInterpreter>) {
        *self.interpreter.write() = Some(interpreter);
    }

    pub fn clear_failure_interpreter(&self) {
        *self.interpreter.write() = None;
    }

    pub fn failure_interpreter(&self) -> Option<Arc<dyn FailureInterpreter>> {
        self.interpreter.read().clone()
    }

    /// Register a state change listener
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        self.callbacks.write().add_listener(Arc::new(listener));
    }

    /// While bypassed, every call runs unprotected and is never counted
    pub fn set_bypassed(&self, bypassed: bool) {
        let was = self.bypassed.swap(bypassed, Ordering::AcqRel);
        if was != bypassed {
            tracing::info!(circuit = %self.context.name, bypassed, "circuit bypass changed");
        }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Acquire)
    }

    pub fn is_hard_tripped(&self) -> bool {
        self.hard_tripped.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_name(self.machine.lock().current_state())
    }

    /// Get current state name
    pub fn state_name(&self) -> &'static str {
        self.state().as_str()
    }

    /// Check if circuit is open
    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    /// Check if circuit is closed
    pub fn is_closed(&self) -> bool {
        self.state() == BreakerState::Closed
    }

    /// When the current Open period started
    pub fn opened_at(&self) -> Option<u64> {
        self.machine.lock().open_data().map(|d| d.opened_at)
    }

    /// Automatic entries into Open plus every manual `trip()`; never reset
    pub fn trip_count(&self) -> u64 {
        self.trip_count.load(Ordering::Acquire)
    }

    pub fn last_trip_cause(&self) -> Option<TripCause> {
        self.last_trip_cause.lock().clone()
    }

    pub fn last_tripped_at(&self) -> Option<u64> {
        self.last_trip_cause
            .lock()
            .as_ref()
            .map(|cause| cause.tripped_at_millis)
    }

    pub fn recovery(&self) -> &Arc<dyn RecoveryPolicy> {
        &self.context.recovery
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.context.clock
    }

    /// Health signal; never moves the state machine
    pub fn status(&self) -> Status {
        let now = self.now();
        let machine = self.machine.lock();
        self.status_of(&machine, now)
    }

    pub fn service_status(&self) -> ServiceStatus {
        let now = self.now();
        let machine = self.machine.lock();
        let status = self.status_of(&machine, now);

        let mut reasons = Vec::new();
        if self.is_bypassed() {
            reasons.push("bypassed".to_string());
        }
        if self.is_hard_tripped() {
            reasons.push("hard-tripped".to_string());
        }
        match BreakerState::from_name(machine.current_state()) {
            BreakerState::Closed => {}
            BreakerState::Open => {
                let opened_at = machine.open_data().map(|d| d.opened_at).unwrap_or(0);
                reasons.push(format!("open since {opened_at}ms"));
            }
            BreakerState::HalfOpen => {
                let entered_at = machine.half_open_data().map(|d| d.entered_at).unwrap_or(0);
                reasons.push(format!("half-open since {entered_at}ms"));
            }
        }
        if status != Status::Up
            && let Some(cause) = self.last_trip_cause.lock().as_ref()
        {
            reasons.push(format!("last trip: {}", cause.description));
        }

        ServiceStatus::new(self.context.name.clone(), status, reasons)
    }

    fn now(&self) -> u64 {
        self.context.clock.now_millis()
    }

    /// Decide whether a call may run, driving any timer-based transition first
    fn admit(&self, pending: &mut Vec<Transition>) -> Result<Admission<'_>, RejectReason> {
        let now = self.now();
        let mut machine = self.machine.lock();

        if self.is_hard_tripped() {
            return Err(RejectReason::HardTripped);
        }

        match BreakerState::from_name(machine.current_state()) {
            BreakerState::Closed => {
                self.context.recovery.on_closed_admission(now);
                return Ok(Admission::Normal);
            }
            BreakerState::Open => match self.context.recovery.mode() {
                RecoveryMode::TrialGate => {
                    if machine.handle(CircuitEvent::AttemptReset).is_ok() {
                        if let Some(data) = machine.half_open_data_mut() {
                            data.entered_at = now;
                        }
                        tracing::info!(circuit = %self.context.name, "circuit half-open");
                        pending.push(self.transition(
                            &machine,
                            BreakerState::Open,
                            BreakerState::HalfOpen,
                            now,
                        ));
                    }
                }
                RecoveryMode::Direct => {
                    if machine.handle(CircuitEvent::Recover).is_ok() {
                        self.context.recovery.on_close(now);
                        tracing::info!(circuit = %self.context.name, "circuit closed after cooldown");
                        pending.push(self.transition(
                            &machine,
                            BreakerState::Open,
                            BreakerState::Closed,
                            now,
                        ));
                        return Ok(Admission::Normal);
                    }
                }
            },
            BreakerState::HalfOpen => {}
        }

        match BreakerState::from_name(machine.current_state()) {
            BreakerState::HalfOpen => {
                TrialPermit::claim(&self.trial_slot, &self.trial_tickets)
                    .map(Admission::Trial)
                    .ok_or(RejectReason::TrialInFlight)
            }
            BreakerState::Open => Err(RejectReason::Open {
                opened_at: machine.open_data().map(|d| d.opened_at).unwrap_or(0),
            }),
            BreakerState::Closed => Ok(Admission::Normal),
        }
    }

    fn record_success(&self, admission: Admission<'_>) {
        let Admission::Trial(permit) = admission else {
            return;
        };

        let now = self.now();
        let mut pending = Vec::new();
        {
            let mut machine = self.machine.lock();
            // a trial from an earlier HalfOpen period no longer decides anything
            if permit.is_current() {
                self.close_after_trial(&mut machine, now, &mut pending);
            }
            permit.resolve();
        }
        self.notify(&pending);
    }

    fn record_failure<E: Debug + 'static>(
        &self,
        admission: Admission<'_>,
        error: &E,
        elapsed: Duration,
    ) {
        let verdict = self.interpret(error, elapsed);
        let now = self.now();
        let mut pending = Vec::new();
        {
            let mut machine = self.machine.lock();
            match verdict {
                Verdict::Trip => {
                    self.remember_cause(format!("{error:?}"), now);
                    self.trip_locked(&mut machine, now, &mut pending);
                }
                Verdict::Tolerate if machine.current_state() == "Closed" => {
                    self.context.recovery.on_failure_tolerated(now);
                    tracing::debug!(circuit = %self.context.name, "failure tolerated");
                }
                Verdict::Tolerate | Verdict::Ignore => {}
            }

            if let Admission::Trial(permit) = admission {
                // The downstream answered; a failure the interpreter does not trip on ends the trial
                if verdict != Verdict::Trip && permit.is_current() {
                    self.close_after_trial(&mut machine, now, &mut pending);
                }
                permit.resolve();
            }
        }
        self.notify(&pending);
    }

    fn interpret<E: Debug + 'static>(&self, error: &E, elapsed: Duration) -> Verdict {
        let Some(interpreter) = self.failure_interpreter() else {
            // No interpreter - default behavior is to trip on all errors
            return Verdict::Trip;
        };
        let ctx = FailureContext::new(&self.context.name, error, elapsed);
        interpreter.interpret(&ctx)
    }

    fn close_after_trial(
        &self,
        machine: &mut DynamicCircuit,
        now: u64,
        pending: &mut Vec<Transition>,
    ) {
        if machine.current_state() == "HalfOpen" && machine.handle(CircuitEvent::Close).is_ok() {
            self.trial_slot.store(NO_TRIAL, Ordering::Release);
            self.context.recovery.on_close(now);
            tracing::info!(circuit = %self.context.name, "circuit closed");
            pending.push(self.transition(machine, BreakerState::HalfOpen, BreakerState::Closed, now));
        }
    }

    fn trip_manually(&self, description: &str) {
        let now = self.now();
        let mut pending = Vec::new();
        {
            let mut machine = self.machine.lock();
            if machine.current_state() == "Open" {
                self.trip_count.fetch_add(1, Ordering::AcqRel);
            }
            self.remember_cause(description.to_string(), now);
            self.trip_locked(&mut machine, now, &mut pending);
        }
        self.notify(&pending);
    }

    /// Enter Open, or restart the cooldown of an already open breaker
    fn trip_locked(&self, machine: &mut DynamicCircuit, now: u64, pending: &mut Vec<Transition>) {
        let from = BreakerState::from_name(machine.current_state());

        if from == BreakerState::Open {
            if let Some(data) = machine.open_data_mut() {
                data.opened_at = now;
            }
        } else if machine.handle(CircuitEvent::Trip).is_ok() {
            if let Some(data) = machine.open_data_mut() {
                data.opened_at = now;
            }
            let trip_count = self.trip_count.fetch_add(1, Ordering::AcqRel) + 1;
            self.context.recovery.on_trip(now);
            tracing::warn!(
                circuit = %self.context.name,
                from = %from,
                trip_count,
                cooldown_millis = self.context.recovery.cooldown_millis(),
                "circuit opened"
            );
            pending.push(self.transition(machine, from, BreakerState::Open, now));
        }

        self.trial_slot.store(NO_TRIAL, Ordering::Release);
    }

    fn remember_cause(&self, description: String, now: u64) {
        *self.last_trip_cause.lock() = Some(TripCause {
            description,
            tripped_at_millis: now,
        });
    }

    fn status_of(&self, machine: &DynamicCircuit, now: u64) -> Status {
        if self.is_bypassed() {
            return Status::Degraded;
        }
        if self.is_hard_tripped() {
            return Status::Down;
        }

        match BreakerState::from_name(machine.current_state()) {
            BreakerState::Closed => Status::Up,
            BreakerState::HalfOpen => Status::Degraded,
            BreakerState::Open => {
                let opened_at = machine.open_data().map(|d| d.opened_at).unwrap_or(0);
                if self
                    .context
                    .recovery
                    .cooldown_elapsed(now.saturating_sub(opened_at))
                {
                    Status::Degraded
                } else {
                    Status::Down
                }
            }
        }
    }

    fn transition(
        &self,
        machine: &DynamicCircuit,
        from: BreakerState,
        to: BreakerState,
        now: u64,
    ) -> Transition {
        Transition {
            circuit: self.context.name.clone(),
            from,
            to,
            status: self.status_of(machine, now),
            at_millis: now,
        }
    }

    /// Fire callbacks outside every breaker lock
    fn notify(&self, pending: &[Transition]) {
        if pending.is_empty() {
            return;
        }
        let callbacks = self.callbacks.read().clone();
        for transition in pending {
            callbacks.fire(transition);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("state", &self.state())
            .field("recovery", &self.context.recovery)
            .field("trip_count", &self.trip_count())
            .field("hard_tripped", &self.is_hard_tripped())
            .field("bypassed", &self.is_bypassed())
            .field("interpreter", &self.failure_interpreter())
            .field("callbacks", &*self.callbacks.read())
            .finish()
    }
}
