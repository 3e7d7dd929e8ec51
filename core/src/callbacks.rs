//! Callback system for circuit breaker state transitions
//!
//! Callbacks run synchronously on the thread that caused the transition,
//! after the breaker has released its state lock. A panicking callback is
//! caught and logged; it never reaches the caller or the breaker state.

use crate::status::{BreakerState, Status};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// A state change observed by listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub circuit: String,
    pub from: BreakerState,
    pub to: BreakerState,
    /// Breaker status right after the transition
    pub status: Status,
    pub at_millis: u64,
}

pub type NameCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type Listener = Arc<dyn Fn(&Transition) + Send + Sync>;

/// Callbacks for circuit breaker events
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<NameCallback>,
    pub on_close: Option<NameCallback>,
    pub on_half_open: Option<NameCallback>,
    pub listeners: Vec<Listener>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// Fan a transition out to the matching name callback and every listener
    pub fn fire(&self, transition: &Transition) {
        let named = match transition.to {
            BreakerState::Open => self.on_open.as_ref(),
            BreakerState::Closed => self.on_close.as_ref(),
            BreakerState::HalfOpen => self.on_half_open.as_ref(),
        };
        if let Some(callback) = named {
            isolate(transition, || callback(&transition.circuit));
        }

        for listener in &self.listeners {
            isolate(transition, || listener(transition));
        }
    }
}

fn isolate<F: FnOnce()>(transition: &Transition, callback: F) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::warn!(
            circuit = %transition.circuit,
            from = %transition.from,
            to = %transition.to,
            "state change listener panicked"
        );
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn opened() -> Transition {
        Transition {
            circuit: "test".to_string(),
            from: BreakerState::Closed,
            to: BreakerState::Open,
            status: Status::Down,
            at_millis: 7,
        }
    }

    #[test]
    fn test_fire_routes_named_callback_and_listeners() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut callbacks = Callbacks::new();
        let opens = Arc::clone(&seen);
        callbacks.on_open = Some(Arc::new(move |name: &str| {
            opens.lock().push(format!("open:{name}"));
        }));
        let closes = Arc::clone(&seen);
        callbacks.on_close = Some(Arc::new(move |name: &str| {
            closes.lock().push(format!("close:{name}"));
        }));
        let transitions = Arc::clone(&seen);
        callbacks.add_listener(Arc::new(move |t: &Transition| {
            transitions.lock().push(format!("{}->{}", t.from, t.to));
        }));

        callbacks.fire(&opened());

        assert_eq!(*seen.lock(), vec!["open:test", "Closed->Open"]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let reached = Arc::new(Mutex::new(false));

        let mut callbacks = Callbacks::new();
        callbacks.add_listener(Arc::new(|_: &Transition| panic!("listener bug")));
        let flag = Arc::clone(&reached);
        callbacks.add_listener(Arc::new(move |_: &Transition| *flag.lock() = true));

        callbacks.fire(&opened());

        assert!(*reached.lock(), "later listeners still run");
    }
}
