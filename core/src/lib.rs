//! FuseMachines - Circuit breakers with pluggable failure interpretation
//!
//! This crate provides:
//! - A circuit breaker state machine (Closed → Open → HalfOpen) with lazy,
//!   inline transitions and a single-caller HalfOpen trial
//! - Fixed-interval and exponential "skeptic" recovery policies
//! - Failure interpreters: count-in-window, percentage of requests, failure kind
//! - Thread-safe windowed event and request counters
//! - A registry of named breakers with flat key/value overrides
//!
//! # Example
//!
//! ```rust
//! use fuse_machines::{CircuitBreaker, DefaultInterpreter, Status};
//! use std::sync::Arc;
//!
//! let interpreter = DefaultInterpreter::builder()
//!     .limit(2)
//!     .window_millis(60_000)
//!     .build()
//!     .expect("valid interpreter");
//!
//! let circuit = CircuitBreaker::builder("my_service")
//!     .reset_millis(30_000)
//!     .failure_interpreter(Arc::new(interpreter))
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build();
//!
//! // Execute with circuit protection
//! let result = circuit.invoke(|| {
//!     // Your service call here
//!     Ok::<_, String>("success")
//! });
//! assert!(result.is_ok());
//!
//! for _ in 0..3 {
//!     let _ = circuit.invoke(|| Err::<(), _>("timeout".to_string()));
//! }
//!
//! // Check circuit state
//! assert!(circuit.is_open());
//! assert_eq!(circuit.status(), Status::Down);
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod clock;
pub mod errors;
pub mod interpreter;
pub mod kind;
pub mod percent;
pub mod recovery;
pub mod registry;
pub mod requests;
pub mod status;
pub mod threshold;
pub mod window;

pub use builder::CircuitBuilder;
pub use callbacks::{Callbacks, Transition};
pub use circuit::{CircuitBreaker, DEFAULT_RESET_MILLIS, TripCause};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{CircuitError, ConfigError, RejectReason, Rejection};
pub use interpreter::{
    FailureContext, FailureFilter, FailureInterpreter, PredicateInterpreter, Verdict,
};
pub use kind::KindInterpreter;
pub use percent::PercentInterpreter;
pub use recovery::{FixedInterval, RecoveryMode, RecoveryPolicy, Skeptic, SkepticSettings};
pub use registry::{BreakerConfig, BreakerRegistry, PropertySource, SkepticConfig};
pub use requests::{RequestCounter, RequestVolume};
pub use status::{BreakerState, ServiceStatus, Status};
pub use threshold::DefaultInterpreter;
pub use window::{EventCounter, WindowedEventCounter};
