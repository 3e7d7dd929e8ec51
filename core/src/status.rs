//! Breaker states and health reporting

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a breaker's state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakerState {
    /// Healthy, calls pass through
    Closed,
    /// Tripped, calls are rejected
    Open,
    /// Cooldown elapsed, a single trial call is permitted
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "Closed",
            Self::Open => "Open",
            Self::HalfOpen => "HalfOpen",
        }
    }

    /// Map a state-machine state name back to the enum
    pub(crate) fn from_name(name: &str) -> Self {
        match name {
            "Closed" => Self::Closed,
            "HalfOpen" => Self::HalfOpen,
            // Anything unexpected is treated as the safest state
            _ => Self::Open,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse health signal of a protected service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Init,
    Up,
    Degraded,
    Down,
    Failed,
}

impl Status {
    /// Whether calls are (or are about to be) served
    pub fn is_available(self) -> bool {
        matches!(self, Self::Up | Self::Degraded)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Up => "UP",
            Self::Degraded => "DEGRADED",
            Self::Down => "DOWN",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Read-only status snapshot of a named service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub status: Status,
    pub reasons: Vec<String>,
}

impl ServiceStatus {
    pub fn new(name: impl Into<String>, status: Status, reasons: Vec<String>) -> Self {
        Self {
            name: name.into(),
            status,
            reasons,
        }
    }
}
