//! Retry budgets and exponential backoff with additive jitter.

use std::time::Duration;

use crate::error::ClassifiedError;

/// Exponential backoff parameters.
///
/// `delay(attempt) = min(initial_delay * multiplier^attempt, max_delay) + uniform(0..=jitter)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the exponential component.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Upper bound of the uniform random addition.
    pub jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: Duration::from_millis(1_000),
        }
    }
}

impl BackoffConfig {
    pub fn without_jitter(self) -> Self {
        Self {
            jitter: Duration::ZERO,
            ..self
        }
    }

    /// Capped exponential component, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scale = self.multiplier.powi(exponent);
        let seconds = self.initial_delay.as_secs_f64() * scale;
        let capped_seconds = seconds.min(self.max_delay.as_secs_f64()).max(0.0);

        // f64 rounding can push a cap near Duration::MAX past what converts back.
        Duration::try_from_secs_f64(capped_seconds)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Full delay before retry number `attempt + 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(fastrand::u64(0..=jitter_ms))
        };

        self.base_delay(attempt).saturating_add(jitter)
    }
}

/// Attempt budget per error kind plus the backoff curve.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub backoff: BackoffConfig,
    /// Retries granted to server and network failures.
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Retries granted to rate-limited and timed-out attempts.
    pub transient_max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            max_retries: 2,
            transient_max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Same budget for every retryable kind.
    pub fn uniform(max_retries: u32, backoff: BackoffConfig) -> Self {
        Self {
            backoff,
            max_retries,
            transient_max_retries: max_retries,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            transient_max_retries: 0,
            ..Self::default()
        }
    }

    /// Retries allowed for a logical call whose latest attempt failed with `error`.
    pub fn budget_for(&self, error: &ClassifiedError) -> u32 {
        if !error.retryable() {
            return 0;
        }

        if error.kind().is_transient() {
            self.transient_max_retries
        } else {
            self.max_retries
        }
    }

    /// Delay before the next attempt, honoring a server-provided `Retry-After`.
    pub fn delay_for(&self, attempt: u32, error: &ClassifiedError) -> Duration {
        let computed = self.backoff.delay(attempt);
        match error.retry_after() {
            Some(retry_after) if retry_after > computed => retry_after.min(self.backoff.max_delay),
            _ => computed,
        }
    }
}

/// Per-call retry bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    last_delay: Duration,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries performed so far; 0 during the initial attempt.
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    pub const fn last_delay(&self) -> Duration {
        self.last_delay
    }

    pub const fn can_retry(&self, budget: u32) -> bool {
        self.attempt < budget
    }

    pub fn record_retry(&mut self, delay: Duration) {
        self.attempt = self.attempt.saturating_add(1);
        self.last_delay = delay;
    }
}
