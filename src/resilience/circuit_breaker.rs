//! Circuit breaker blackout arithmetic.
//!
//! # States
//! There is no stored open/closed flag. A server is tripped iff
//! ```text
//! successive_failures > 0 && now < last_failure + blackout(successive_failures)
//! ```
//! so the breaker closes by itself when the window elapses and reopens on
//! the next circuit-tripping failure.
//!
//! # Design Decisions
//! - Per-server breaker (not global)
//! - Growth curve is configuration, not a constant
//! - Blackout is zero below the failure threshold

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::schema::CircuitBreakerConfig;

/// Exponent cap for the exponential curve.
const MAX_DOUBLINGS: u32 = 16;

/// How the blackout window grows with consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlackoutCurve {
    /// `base * 2^(failures - threshold)`, capped.
    #[default]
    Exponential,
    /// `base * (failures - threshold + 1)`, capped.
    Linear,
    /// `base`, capped.
    Fixed,
}

/// Computes blackout windows from a failure streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlackoutPolicy {
    curve: BlackoutCurve,
    base_ms: u64,
    max_ms: u64,
    threshold: u32,
}

impl BlackoutPolicy {
    pub fn new(curve: BlackoutCurve, base_ms: u64, max_ms: u64, threshold: u32) -> Self {
        Self {
            curve,
            base_ms,
            max_ms,
            threshold: threshold.max(1),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(
            config.curve,
            config.base_blackout_ms,
            config.max_blackout_ms,
            config.failure_threshold,
        )
    }

    pub fn curve(&self) -> BlackoutCurve {
        self.curve
    }

    /// Blackout window in milliseconds after `failures` consecutive failures.
    pub fn blackout_ms(&self, failures: u32) -> u64 {
        if failures < self.threshold {
            return 0;
        }
        let steps = failures - self.threshold;

        let raw = match self.curve {
            BlackoutCurve::Exponential => {
                let factor = 1u64 << steps.min(MAX_DOUBLINGS);
                self.base_ms.saturating_mul(factor)
            }
            BlackoutCurve::Linear => self.base_ms.saturating_mul(u64::from(steps) + 1),
            BlackoutCurve::Fixed => self.base_ms,
        };
        raw.min(self.max_ms)
    }

    pub fn blackout(&self, failures: u32) -> Duration {
        Duration::from_millis(self.blackout_ms(failures))
    }

    /// Trip status derived from the stored streak and timestamp.
    pub fn is_tripped(&self, failures: u32, last_failure_ms: u64, now_ms: u64) -> bool {
        self.remaining_ms(failures, last_failure_ms, now_ms) > 0
    }

    /// Milliseconds left in the current blackout, zero when closed.
    pub fn remaining_ms(&self, failures: u32, last_failure_ms: u64, now_ms: u64) -> u64 {
        if failures == 0 {
            return 0;
        }
        let until = last_failure_ms.saturating_add(self.blackout_ms(failures));
        until.saturating_sub(now_ms)
    }
}

impl Default for BlackoutPolicy {
    fn default() -> Self {
        Self::from_config(&CircuitBreakerConfig::default())
    }
}
