use std::time::Duration;

use crate::settings::SETTINGS;

/// Retry schedule for the event channel.
///
/// Alternates a burst of exponential retries (`base * 2^attempt` for
/// `attempt < max_attempts`) with one slow probe after `long_period`, then
/// starts the burst over. It never gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max_attempts: u32,
    pub long_period: Duration,
}

/// One decision of the policy: how long to wait and which attempt number
/// the following failure should be scheduled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStep {
    pub delay: Duration,
    pub next_attempt: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: SETTINGS.backoff_base,
            max_attempts: SETTINGS.backoff_max_attempts,
            long_period: SETTINGS.backoff_long_period,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max_attempts: u32, long_period: Duration) -> Self {
        Self {
            base,
            max_attempts: max_attempts.max(1),
            long_period,
        }
    }

    /// Same schedule starting from a different base delay, e.g. one
    /// suggested by the server.
    pub fn with_base(self, base: Duration) -> Self {
        Self { base, ..self }
    }

    pub fn schedule(&self, attempt: u32) -> RetryStep {
        if attempt >= self.max_attempts {
            return RetryStep {
                delay: self.long_period,
                next_attempt: 0,
            };
        }
        let factor = 2u32.saturating_pow(attempt);
        RetryStep {
            delay: self.base.saturating_mul(factor),
            next_attempt: (attempt + 1).min(self.max_attempts),
        }
    }
}

/// Spreads a delay by up to `±jitter` of itself. A jitter of zero returns
/// the delay unchanged.
pub fn apply_jitter(delay: Duration, jitter: f32) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let jitter = jitter.min(1.0);
    let jitter_factor = rand::random::<f32>() * 2.0 * jitter - jitter; // -jitter to +jitter
    let offset = delay.mul_f32(jitter_factor.abs());
    if jitter_factor >= 0.0 {
        delay + offset
    } else {
        delay.saturating_sub(offset)
    }
}
