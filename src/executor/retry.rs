use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration, factor: f64, max: Duration },
}

/// How often a failing action is attempted and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(cfg: &RetryConfig) -> Self {
        let base = Duration::from_millis(cfg.base_delay_ms);
        let backoff = match cfg.backoff {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                factor: cfg.factor,
                max: Duration::from_millis(cfg.max_delay_ms),
            },
        };
        Self::new(cfg.max_attempts, backoff)
    }

    /// Delay after failed attempt `attempt` (1-based). `None` once attempts are exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(match &self.backoff {
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { base, factor, max } => {
                let exp = factor.powi(attempt.saturating_sub(1) as i32);
                let secs = (base.as_secs_f64() * exp).min(max.as_secs_f64()).max(0.0);
                Duration::from_secs_f64(secs)
            }
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Backoff::Fixed(Duration::from_millis(500)))
    }
}
