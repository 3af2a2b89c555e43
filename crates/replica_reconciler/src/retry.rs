//! Backoff between failed reconcile passes.
//!
//! The reconciler itself never retries. When the actuator rejects some
//! actions the controller loop waits according to a [`Backoff`] before the
//! next pass and gives up after `max_attempts` consecutive failed passes.

use std::time::Duration;

use rand::Rng;

/// Retry policy for the controller loop.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of consecutive failed passes (0 = infinite)
    pub max_attempts: u32,
    /// Delay after the first failed pass
    pub initial_delay: Duration,
    /// Upper bound for the delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Tracks consecutive failures for one controller.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
    delay: Duration,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        let delay = config.initial_delay;
        Self {
            config,
            attempt: 0,
            delay,
        }
    }

    /// Upper bound for a single delay before jitter.
    pub fn max_delay(&self) -> Duration {
        self.config.max_delay
    }

    /// Consecutive failures recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Records a failure and returns how long to wait before retrying.
    ///
    /// Returns `None` once `max_attempts` failures have been recorded.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.config.max_attempts > 0 && self.attempt >= self.config.max_attempts {
            return None;
        }

        // Jitter: 0.5x to 1.5x of the delay
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = Duration::from_secs_f64(self.delay.as_secs_f64() * jitter);

        let next = (self.delay.as_secs_f64() * self.config.backoff_multiplier)
            .min(self.config.max_delay.as_secs_f64());
        // Negative multipliers collapse to zero
        self.delay = if next > 0.0 {
            Duration::from_secs_f64(next)
        } else {
            Duration::ZERO
        };

        Some(jittered)
    }

    /// Clears the failure count after a clean pass.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.delay = self.config.initial_delay;
    }
}
