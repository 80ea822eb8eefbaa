//! Exponential retry backoff with jitter

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Doubling delay, capped, with up to 10% random jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    /// Start with no recorded failures
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config, attempts: 0 }
    }

    /// Failures since the last reset
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay for the next failure before jitter
    pub fn base_delay(&self) -> Duration {
        self.config.initial.saturating_mul(2u32.saturating_pow(self.attempts)).min(self.config.max)
    }

    /// Record a failure and return how long to wait before retrying
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempts = self.attempts.saturating_add(1);

        let max_jitter = (base.as_millis() / 10) as u64;
        let jitter = if max_jitter == 0 { 0 } else { rand::thread_rng().gen_range(0..=max_jitter) };
        (base + Duration::from_millis(jitter)).min(self.config.max)
    }

    /// Forget past failures
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
