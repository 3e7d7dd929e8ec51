//! Named breakers with creation-time configuration overrides
//!
//! Overrides come from a flat key/value source using dotted keys:
//!
//! ```text
//! circuit.<name>.limit          circuit.<name>.windowMillis   circuit.<name>.resetMillis
//! skeptic.<name>.waitBase       skeptic.<name>.waitMult       skeptic.<name>.goodBase
//! skeptic.<name>.goodMult       skeptic.<name>.maxLevel
//! skeptic.<name>.limit          skeptic.<name>.windowMillis
//! ```
//!
//! The source is consulted once, when a name is first created.

use crate::builder::CircuitBuilder;
use crate::circuit::{CircuitBreaker, DEFAULT_RESET_MILLIS};
use crate::clock::{Clock, SystemClock};
use crate::errors::ConfigError;
use crate::recovery::SkepticSettings;
use crate::threshold::DefaultInterpreter;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Flat configuration lookup
pub trait PropertySource: Send + Sync + std::fmt::Debug {
    fn property(&self, key: &str) -> Option<String>;
}

impl PropertySource for HashMap<String, String> {
    fn property(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Fixed-interval breaker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BreakerConfig {
    /// Failures tolerated within the window; 0 trips on every failure
    pub limit: usize,
    pub window_millis: u64,
    pub reset_millis: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            limit: 0,
            window_millis: 0,
            reset_millis: DEFAULT_RESET_MILLIS,
        }
    }
}

/// Skeptic breaker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SkepticConfig {
    pub wait_base: u64,
    pub wait_mult: u64,
    pub good_base: u64,
    pub good_mult: u64,
    pub max_level: u32,
    pub limit: usize,
    pub window_millis: u64,
}

impl Default for SkepticConfig {
    fn default() -> Self {
        let settings = SkepticSettings::default();
        Self {
            wait_base: settings.wait_base,
            wait_mult: settings.wait_mult,
            good_base: settings.good_base,
            good_mult: settings.good_mult,
            max_level: settings.max_level,
            limit: 0,
            window_millis: 0,
        }
    }
}

impl SkepticConfig {
    pub fn settings(&self) -> SkepticSettings {
        SkepticSettings {
            wait_base: self.wait_base,
            wait_mult: self.wait_mult,
            good_base: self.good_base,
            good_mult: self.good_mult,
            max_level: self.max_level,
        }
    }
}

/// Keyed collection of breakers, created on first request
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    properties: Option<Arc<dyn PropertySource>>,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            properties: None,
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn with_properties(mut self, properties: Arc<dyn PropertySource>) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Time source shared by every breaker this registry creates
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the breaker registered under `name`, creating a fixed-interval one if absent
    ///
    /// An existing breaker is returned as is, whatever its kind; `config` is
    /// only used on creation.
    pub fn create_breaker(
        &self,
        name: &str,
        config: BreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        let mut breakers = self.breakers.write();
        if let Some(breaker) = breakers.get(name) {
            return Ok(Arc::clone(breaker));
        }

        let prefix = format!("circuit.{name}");
        let config = BreakerConfig {
            limit: self.override_value(&prefix, "limit", config.limit)?,
            window_millis: self.override_value(&prefix, "windowMillis", config.window_millis)?,
            reset_millis: self.override_value(&prefix, "resetMillis", config.reset_millis)?,
        };

        let builder = CircuitBuilder::new(name).reset_millis(config.reset_millis);
        let breaker = Arc::new(self.finish(builder, config.limit, config.window_millis)?);
        breakers.insert(name.to_string(), Arc::clone(&breaker));

        tracing::info!(circuit = %name, ?config, "circuit breaker registered");
        Ok(breaker)
    }

    /// Get the breaker registered under `name`, creating a skeptic one if absent
    pub fn create_skeptic(
        &self,
        name: &str,
        config: SkepticConfig,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        let mut breakers = self.breakers.write();
        if let Some(breaker) = breakers.get(name) {
            return Ok(Arc::clone(breaker));
        }

        let prefix = format!("skeptic.{name}");
        let config = SkepticConfig {
            wait_base: self.override_value(&prefix, "waitBase", config.wait_base)?,
            wait_mult: self.override_value(&prefix, "waitMult", config.wait_mult)?,
            good_base: self.override_value(&prefix, "goodBase", config.good_base)?,
            good_mult: self.override_value(&prefix, "goodMult", config.good_mult)?,
            max_level: self.override_value(&prefix, "maxLevel", config.max_level)?,
            limit: self.override_value(&prefix, "limit", config.limit)?,
            window_millis: self.override_value(&prefix, "windowMillis", config.window_millis)?,
        };

        let builder = CircuitBuilder::new(name).skeptic(config.settings())?;
        let breaker = Arc::new(self.finish(builder, config.limit, config.window_millis)?);
        breakers.insert(name.to_string(), Arc::clone(&breaker));

        tracing::info!(circuit = %name, ?config, "skeptic breaker registered");
        Ok(breaker)
    }

    pub fn find(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    fn finish(
        &self,
        builder: CircuitBuilder,
        limit: usize,
        window_millis: u64,
    ) -> Result<CircuitBreaker, ConfigError> {
        let mut builder = builder.clock(Arc::clone(&self.clock));
        if limit > 0 && window_millis > 0 {
            let interpreter = DefaultInterpreter::builder()
                .limit(limit)
                .window_millis(window_millis)
                .clock(Arc::clone(&self.clock))
                .build()?;
            builder = builder.failure_interpreter(Arc::new(interpreter));
        }
        Ok(builder.build())
    }

    fn override_value<T: FromStr>(
        &self,
        prefix: &str,
        field: &str,
        current: T,
    ) -> Result<T, ConfigError> {
        let key = format!("{prefix}.{field}");
        let Some(value) = self.properties.as_ref().and_then(|p| p.property(&key)) else {
            return Ok(current);
        };
        value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidProperty { key, value })
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
