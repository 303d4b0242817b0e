//! Exponential backoff with jitter, applied between failed passes.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration for the backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay after the first failure, in milliseconds.
    pub initial_ms: u64,
    /// Upper bound for the delay, in milliseconds.
    pub max_ms: u64,
    /// Multiplier applied per consecutive failure.
    pub multiplier: f64,
    /// Random jitter of up to `±jitter_fraction * delay` (0.0 = none).
    pub jitter_fraction: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 60_000,
            multiplier: 2.0,
            jitter_fraction: 0.2,
        }
    }
}

/// Stateless backoff policy: computes the delay for the n-th consecutive failure.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub config: BackoffConfig,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay before retrying after `failures` consecutive failures (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let capped = self.base_ms(failures);
        let spread = capped * self.config.jitter_fraction.clamp(0.0, 1.0);
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    /// Delay without jitter.
    fn base_ms(&self, failures: u32) -> f64 {
        let exp = failures.saturating_sub(1).min(63) as i32;
        let base = self.config.initial_ms as f64 * self.config.multiplier.powi(exp);
        base.min(self.config.max_ms as f64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
