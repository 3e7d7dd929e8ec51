//! Recovery policies: how long an open breaker waits and how it comes back
//!
//! A breaker is a single state machine parameterized by one of these
//! policies. `FixedInterval` waits a constant cooldown and then admits one
//! trial call through HalfOpen. `Skeptic` grows its cooldown exponentially
//! with recent trips, closes directly once it elapses, and earns its trust
//! back by staying healthy while Closed.

use crate::errors::ConfigError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest skepticism level; `2^62` still fits a `u64` multiplier
pub const MAX_SKEPTIC_LEVEL: u32 = 62;

/// How an open breaker leaves the Open state once its cooldown elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Open → HalfOpen, then a single trial call decides
    TrialGate,
    /// Open → Closed; the next admitted call acts as the trial
    Direct,
}

/// Timer policy consulted by the breaker on every transition
///
/// Hooks are invoked while the breaker holds its state lock, so they must
/// not call back into the breaker.
pub trait RecoveryPolicy: Send + Sync + std::fmt::Debug {
    fn mode(&self) -> RecoveryMode;

    /// Current cooldown an open breaker must wait
    fn cooldown_millis(&self) -> u64;

    fn cooldown_elapsed(&self, elapsed_millis: u64) -> bool {
        elapsed_millis >= self.cooldown_millis()
    }

    /// The breaker entered Open from Closed or HalfOpen
    fn on_trip(&self, _now: u64) {}

    /// The breaker entered Closed
    fn on_close(&self, _now: u64) {}

    /// A failure was counted while Closed but stayed below the trip threshold
    fn on_failure_tolerated(&self, _now: u64) {}

    /// A call was admitted while Closed
    fn on_closed_admission(&self, _now: u64) {}
}

/// Constant cooldown with optional jitter
#[derive(Debug)]
pub struct FixedInterval {
    reset_millis: AtomicU64,
    /// Cooldown drawn for the current Open period
    effective_millis: AtomicU64,
    jitter_factor: f64,
}

impl FixedInterval {
    pub fn new(reset_millis: u64) -> Self {
        Self::with_jitter(reset_millis, 0.0)
    }

    /// `jitter_factor` of 0.25 means up to 25% shorter cooldowns
    pub fn with_jitter(reset_millis: u64, jitter_factor: f64) -> Self {
        let jitter_factor = jitter_factor.clamp(0.0, 1.0);
        Self {
            reset_millis: AtomicU64::new(reset_millis),
            effective_millis: AtomicU64::new(reset_millis),
            jitter_factor,
        }
    }

    pub fn reset_millis(&self) -> u64 {
        self.reset_millis.load(Ordering::Acquire)
    }

    pub fn jitter_factor(&self) -> f64 {
        self.jitter_factor
    }

    pub fn set_reset_millis(&self, reset_millis: u64) {
        self.reset_millis.store(reset_millis, Ordering::Release);
        self.effective_millis.store(reset_millis, Ordering::Release);
    }

    fn draw(&self) -> u64 {
        let base = self.reset_millis();
        if self.jitter_factor > 0.0 {
            let policy = chrono_machines::Policy {
                max_attempts: 1,
                base_delay_ms: base,
                multiplier: 1.0,
                max_delay_ms: base,
            };
            policy.calculate_delay(1, self.jitter_factor)
        } else {
            base
        }
    }
}

impl RecoveryPolicy for FixedInterval {
    fn mode(&self) -> RecoveryMode {
        RecoveryMode::TrialGate
    }

    fn cooldown_millis(&self) -> u64 {
        self.effective_millis.load(Ordering::Acquire)
    }

    fn on_trip(&self, _now: u64) {
        self.effective_millis.store(self.draw(), Ordering::Release);
    }
}

/// Settings for exponential skepticism
///
/// With skepticism level `L`:
///
/// ```text
/// wait = wait_base + wait_mult * 2^L
/// good = good_base + good_mult * 2^L
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkepticSettings {
    pub wait_base: u64,
    pub wait_mult: u64,
    pub good_base: u64,
    pub good_mult: u64,
    pub max_level: u32,
}

impl Default for SkepticSettings {
    fn default() -> Self {
        Self {
            wait_base: 1_000,
            wait_mult: 100,
            good_base: 1_000,
            good_mult: 100,
            max_level: 20,
        }
    }
}

#[derive(Debug)]
struct SkepticState {
    settings: SkepticSettings,
    level: u32,
    wait_millis: u64,
    good_millis: u64,
    healthy_since: u64,
}

impl SkepticState {
    fn recompute(&mut self) {
        let scale = 1u64 << self.level.min(MAX_SKEPTIC_LEVEL);
        let s = &self.settings;
        self.wait_millis = s.wait_base.saturating_add(s.wait_mult.saturating_mul(scale));
        self.good_millis = s.good_base.saturating_add(s.good_mult.saturating_mul(scale));
    }
}

/// Exponential backoff with confidence decay
///
/// Every trip from Closed raises the level by one (up to `max_level`).
/// Each full good period spent Closed without a counted failure lowers it
/// by one again.
#[derive(Debug)]
pub struct Skeptic {
    state: Mutex<SkepticState>,
}

impl Skeptic {
    pub fn new(settings: SkepticSettings) -> Result<Self, ConfigError> {
        if settings.max_level > MAX_SKEPTIC_LEVEL {
            return Err(ConfigError::LevelOutOfRange {
                level: settings.max_level,
                max: MAX_SKEPTIC_LEVEL,
            });
        }

        let mut state = SkepticState {
            settings,
            level: 0,
            wait_millis: 0,
            good_millis: 0,
            healthy_since: 0,
        };
        state.recompute();
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    pub fn level(&self) -> u32 {
        self.state.lock().level
    }

    pub fn wait_millis(&self) -> u64 {
        self.state.lock().wait_millis
    }

    pub fn good_millis(&self) -> u64 {
        self.state.lock().good_millis
    }

    pub fn settings(&self) -> SkepticSettings {
        self.state.lock().settings
    }

    pub fn set_wait_base(&self, wait_base: u64) {
        self.update(|s| s.wait_base = wait_base);
    }

    pub fn set_wait_mult(&self, wait_mult: u64) {
        self.update(|s| s.wait_mult = wait_mult);
    }

    pub fn set_good_base(&self, good_base: u64) {
        self.update(|s| s.good_base = good_base);
    }

    pub fn set_good_mult(&self, good_mult: u64) {
        self.update(|s| s.good_mult = good_mult);
    }

    /// Lowering the ceiling clamps the current level
    pub fn set_max_level(&self, max_level: u32) -> Result<(), ConfigError> {
        if max_level > MAX_SKEPTIC_LEVEL {
            return Err(ConfigError::LevelOutOfRange {
                level: max_level,
                max: MAX_SKEPTIC_LEVEL,
            });
        }
        let mut state = self.state.lock();
        state.settings.max_level = max_level;
        state.level = state.level.min(max_level);
        state.recompute();
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut SkepticSettings)) {
        let mut state = self.state.lock();
        apply(&mut state.settings);
        state.recompute();
    }
}

impl RecoveryPolicy for Skeptic {
    fn mode(&self) -> RecoveryMode {
        RecoveryMode::Direct
    }

    fn cooldown_millis(&self) -> u64 {
        self.wait_millis()
    }

    fn on_trip(&self, _now: u64) {
        let mut state = self.state.lock();
        state.level = state.level.saturating_add(1).min(state.settings.max_level);
        state.recompute();
        tracing::debug!(
            level = state.level,
            wait_millis = state.wait_millis,
            "skepticism raised"
        );
    }

    fn on_close(&self, now: u64) {
        self.state.lock().healthy_since = now;
    }

    fn on_failure_tolerated(&self, now: u64) {
        self.state.lock().healthy_since = now;
    }

    fn on_closed_admission(&self, now: u64) {
        let mut state = self.state.lock();
        let before = state.level;
        while state.level > 0 && now.saturating_sub(state.healthy_since) >= state.good_millis {
            state.healthy_since = state.healthy_since.saturating_add(state.good_millis);
            state.level -= 1;
            state.recompute();
        }
        if state.level != before {
            tracing::debug!(
                from = before,
                level = state.level,
                good_millis = state.good_millis,
                "skepticism decayed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skeptic(max_level: u32) -> Skeptic {
        Skeptic::new(SkepticSettings {
            wait_base: 100,
            wait_mult: 10,
            good_base: 1_000,
            good_mult: 100,
            max_level,
        })
        .expect("valid settings")
    }

    #[test]
    fn test_fixed_interval_without_jitter() {
        let policy = FixedInterval::new(1_000);

        assert_eq!(policy.mode(), RecoveryMode::TrialGate);
        assert!(!policy.cooldown_elapsed(999));
        assert!(policy.cooldown_elapsed(1_000));

        policy.on_trip(0);
        assert_eq!(policy.cooldown_millis(), 1_000);

        policy.set_reset_millis(50);
        assert_eq!(policy.reset_millis(), 50);
        assert!(policy.cooldown_elapsed(50));
    }

    #[test]
    fn test_fixed_interval_jitter_stays_within_bounds() {
        let policy = FixedInterval::with_jitter(1_000, 0.5);

        for _ in 0..20 {
            policy.on_trip(0);
            let cooldown = policy.cooldown_millis();
            assert!(
                (490..=1_010).contains(&cooldown),
                "cooldown {cooldown} outside jitter range"
            );
        }
    }

    #[test]
    fn test_skeptic_wait_grows_exponentially() {
        let policy = skeptic(4);
        assert_eq!(policy.mode(), RecoveryMode::Direct);
        assert_eq!(policy.wait_millis(), 100 + 10);

        for trips in 1..=6u32 {
            policy.on_trip(0);
            let expected = 100 + 10 * (1u64 << trips.min(4));
            assert_eq!(policy.wait_millis(), expected, "after {trips} trips");
            assert_eq!(policy.level(), trips.min(4));
        }
    }

    #[test]
    fn test_decay_applies_every_earned_period() {
        let policy = skeptic(10);
        policy.on_trip(0);
        policy.on_trip(0);
        policy.on_trip(0);
        assert_eq!(policy.level(), 3);
        assert_eq!(policy.good_millis(), 1_000 + 100 * 8);

        policy.on_close(10_000);
        // level 3 -> 2 needs 1800ms, 2 -> 1 another 1400ms
        policy.on_closed_admission(10_000 + 1_800 + 1_400);
        assert_eq!(policy.level(), 1);

        // the remainder carried over, 1 -> 0 needs 1200ms more
        policy.on_closed_admission(10_000 + 1_800 + 1_400 + 1_199);
        assert_eq!(policy.level(), 1);
        policy.on_closed_admission(10_000 + 1_800 + 1_400 + 1_200);
        assert_eq!(policy.level(), 0);
        assert_eq!(policy.wait_millis(), 110);
    }

    #[test]
    fn test_tolerated_failure_restarts_healthy_period() {
        let policy = skeptic(10);
        policy.on_trip(0);
        policy.on_close(0);

        policy.on_failure_tolerated(1_000);
        policy.on_closed_admission(1_500);
        assert_eq!(policy.level(), 1);

        policy.on_closed_admission(1_000 + 1_200);
        assert_eq!(policy.level(), 0);
    }

    #[test]
    fn test_setters_recompute_timers() {
        let policy = skeptic(10);
        policy.on_trip(0);

        policy.set_wait_base(0);
        assert_eq!(policy.wait_millis(), 20);
        policy.set_wait_mult(1);
        assert_eq!(policy.wait_millis(), 2);
        policy.set_good_base(5);
        policy.set_good_mult(0);
        assert_eq!(policy.good_millis(), 5);

        policy.set_max_level(0).expect("valid level");
        assert_eq!(policy.level(), 0);
        assert_eq!(policy.wait_millis(), 1);
    }

    #[test]
    fn test_level_ceiling_is_validated() {
        let result = Skeptic::new(SkepticSettings {
            max_level: 63,
            ..SkepticSettings::default()
        });

        assert_eq!(
            result.unwrap_err(),
            ConfigError::LevelOutOfRange { level: 63, max: 62 }
        );
        assert!(skeptic(1).set_max_level(100).is_err());
    }

    #[test]
    fn test_huge_multipliers_saturate() {
        let policy = Skeptic::new(SkepticSettings {
            wait_base: 1,
            wait_mult: u64::MAX / 2,
            good_base: 0,
            good_mult: 0,
            max_level: MAX_SKEPTIC_LEVEL,
        })
        .expect("valid settings");

        for _ in 0..MAX_SKEPTIC_LEVEL {
            policy.on_trip(0);
        }
        assert_eq!(policy.wait_millis(), u64::MAX);
    }
}
