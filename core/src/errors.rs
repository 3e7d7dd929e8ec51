//! Error types for circuit breaker operations

use thiserror::Error;

/// Why a breaker refused to run a call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// Cooldown has not elapsed since the last failure
    #[error("open since {opened_at}ms")]
    Open { opened_at: u64 },
    /// Half-open and another caller already holds the trial slot
    #[error("half-open trial already in flight")]
    TrialInFlight,
    /// Manually hard-tripped; only `reset()` lets calls through again
    #[error("hard-tripped")]
    HardTripped,
}

/// A call denied by the breaker itself. The wrapped operation never ran.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit '{circuit}' rejected the call: {reason}")]
pub struct Rejection {
    pub circuit: String,
    pub reason: RejectReason,
}

/// Errors that can occur during circuit breaker operations
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The breaker denied the call
    #[error(transparent)]
    Rejected(#[from] Rejection),
    /// The wrapped operation failed; this is the original failure, untouched
    #[error("Circuit execution failed: {0}")]
    Execution(E),
}

impl<E> CircuitError<E> {
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            Self::Execution(_) => None,
        }
    }

    /// The operation's own failure, if the call was allowed through
    pub fn into_execution(self) -> Option<E> {
        match self {
            Self::Execution(e) => Some(e),
            Self::Rejected(_) => None,
        }
    }

    /// Collapse into the application's error type, translating rejections with `map`
    pub fn map_rejection<F>(self, map: F) -> E
    where
        F: FnOnce(Rejection) -> E,
    {
        match self {
            Self::Rejected(rejection) => map(rejection),
            Self::Execution(e) => e,
        }
    }
}

/// Invalid configuration, reported when a component is built or reconfigured
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    NonPositive { name: &'static str },

    #[error("ignore and target filters are mutually exclusive")]
    ConflictingFilters,

    #[error("at least one failure kind is required")]
    EmptyKinds,

    #[error("percent must be between 0 and 100, got {0}")]
    PercentOutOfRange(u32),

    #[error("max skepticism level {level} exceeds the supported maximum of {max}")]
    LevelOutOfRange { level: u32, max: u32 },

    #[error("property '{key}' has invalid value '{value}'")]
    InvalidProperty { key: String, value: String },
}
