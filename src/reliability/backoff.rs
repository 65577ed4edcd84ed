//! Backoff delays for prediction retries and channel reconnects.
//!
//! Retries back off exponentially (`2^attempt * base * jitter`); reconnects
//! back off linearly in the number of consecutive failures, up to a cap.

use std::time::Duration;

/// Scaling factor applied to a backoff ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// Uniform in `[0, 1)`, drawn per delay.
    Full,
    /// Always the given factor, clamped to `[0, 1]`.
    Fixed(f64),
}

impl Default for Jitter {
    fn default() -> Self {
        Self::Full
    }
}

impl Jitter {
    pub fn sample(&self) -> f64 {
        match self {
            Self::Full => rand::random::<f64>(),
            Self::Fixed(f) => f.clamp(0.0, 1.0),
        }
    }
}

/// Upper bound of the delay before retrying after failed attempt `attempt`.
pub fn retry_delay_ceiling(attempt: u32, base: Duration) -> Duration {
    base.mul_f64(2f64.powi(attempt.min(30) as i32))
}

/// Delay before retrying after failed attempt `attempt` (1-based).
pub fn retry_delay(attempt: u32, base: Duration, jitter: Jitter) -> Duration {
    retry_delay_ceiling(attempt, base).mul_f64(jitter.sample())
}

/// Linear backoff between reconnects of a failed channel.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectBackoff {
    /// Delay per consecutive failure.
    pub base: Duration,
    /// Failures beyond this count do not grow the delay.
    pub failure_cap: u32,
    pub jitter: Jitter,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            base: crate::constants::retry::DEFAULT_RECONNECT_BASE_DELAY,
            failure_cap: crate::constants::retry::DEFAULT_RECONNECT_FAILURE_CAP,
            jitter: Jitter::Full,
        }
    }
}

impl ReconnectBackoff {
    /// `min(failures, cap) * base * jitter`.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let steps = consecutive_failures.min(self.failure_cap) as f64;
        self.base.mul_f64(steps * self.jitter.sample())
    }
}
