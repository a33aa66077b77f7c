use broadcast_core::config::DispatchConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    /// Deadline for a single provider call.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
            jitter: true,
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
        }
    }

    /// Delay before retry number `retry` (0 for the first retry). Grows by
    /// `backoff_multiplier` per retry up to `max_backoff_ms`. With jitter on,
    /// half the delay is fixed and the other half drawn uniformly, so
    /// recipients failing together spread out.
    pub fn backoff_for_attempt(&self, retry: u32) -> Duration {
        if self.initial_backoff_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let growth = self.backoff_multiplier.max(1.0).powi(exponent);
        // f64::min also maps an infinite product back to the ceiling.
        let millis = (self.initial_backoff_ms as f64 * growth).min(self.max_backoff_ms as f64);
        let delay = Duration::from_millis(millis as u64);

        if !self.jitter {
            return delay;
        }
        let half = delay / 2;
        half + half.mul_f64(rand::thread_rng().gen::<f64>())
    }

    pub fn has_attempts_left(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
