//! Exponential backoff with jitter for consumers of an unavailable queue.
//!
//! A consumer keeps a [`Backoff`] across failed pops, sleeps for
//! [`Backoff::next_sleep`] after each failure, and calls [`Backoff::reset`]
//! once a pop succeeds.

use std::time::Duration;

use rand::Rng;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts (before jitter).
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Add up to 50% random jitter on top of `delay`.
pub fn with_jitter(delay: Duration) -> Duration {
    let max_extra = (delay.as_millis() / 2) as u64;
    if max_extra == 0 {
        return delay;
    }
    let extra = rand::rng().random_range(0..=max_extra);
    delay + Duration::from_millis(extra)
}

/// Stateful backoff tracker.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_delay;
        Self {
            config,
            current,
            attempt: 0,
        }
    }

    /// Number of consecutive failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return how long to sleep before retrying.
    pub fn next_sleep(&mut self) -> Duration {
        self.attempt += 1;
        let sleep = with_jitter(self.current);
        self.current = next_delay(self.current, &self.config);
        sleep
    }

    /// Forget past failures.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
