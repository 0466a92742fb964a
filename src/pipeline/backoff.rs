//! Bounded exponential backoff shared by the chain schedulers
//!
//! Delay for escalation level `n` is `min(initial * 2^n, max)`, optionally
//! jittered by ±`jitter` and clamped back under `max`. The level survives
//! failed ticks and only drops back to the floor on `reset()` (after a
//! successful tick).

use rand::Rng;
use std::time::Duration;

/// Highest escalation level; 2^16 × any sane floor is far past the ceiling
const MAX_LEVEL: u32 = 16;

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    level: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max.max(initial),
            jitter: 0.0,
            level: 0,
        }
    }

    /// Randomize each delay by up to ±`fraction` (clamped to 0.0..=0.5)
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 0.5);
        self
    }

    /// Compute the next delay and escalate
    pub fn next_delay(&mut self) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(1u32 << self.level)
            .min(self.max_delay);

        self.level = (self.level + 1).min(MAX_LEVEL);

        if self.jitter == 0.0 {
            return base;
        }

        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(factor).min(self.max_delay)
    }

    pub fn reset(&mut self) {
        self.level = 0;
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}
