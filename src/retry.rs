use std::time::Duration;

use rand::Rng;

use crate::config::BatchOperationConfig;
use crate::error::TaskError;

/// Decides whether a failed attempt is retried, and after how long.
///
/// `attempt` counts failed attempts so far: it is 1 after the first failure.
/// Permanent [`TaskError`]s never reach the policy.
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, attempt: u32, error: &TaskError) -> bool;

    fn delay_for(&self, attempt: u32) -> Duration;
}

/// Exponential backoff: `base * 2^(attempt - 1)`, optionally capped and jittered.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Option<Duration>,
    pub jitter: Duration,
}

impl ExponentialBackoff {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: None,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_max_delay(mut self, ceiling: Duration) -> Self {
        self.max_delay = Some(ceiling);
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff before jitter.
    fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        match self.max_delay {
            Some(ceiling) => delay.min(ceiling),
            None => delay,
        }
    }
}

impl From<&BatchOperationConfig> for ExponentialBackoff {
    fn from(config: &BatchOperationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_delay,
            max_delay: config.max_retry_delay,
            jitter: config.retry_jitter,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, attempt: u32, _error: &TaskError) -> bool {
        attempt <= self.max_retries
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        if self.jitter.is_zero() {
            return delay;
        }
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = rand::rng().random_range(0..=jitter_ms);
        delay.saturating_add(Duration::from_millis(extra))
    }
}

/// Single-shot: every failure is final.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _attempt: u32, _error: &TaskError) -> bool {
        false
    }

    fn delay_for(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}
