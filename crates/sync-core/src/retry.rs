use std::time::Duration;

const MAX_BACKOFF_SHIFT: u32 = 20;

/// Exponential backoff for re-establishing failed subscriptions and fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay before the given retry attempt, doubling per attempt and capped
    /// at the maximum. A server retry hint takes precedence when it is
    /// larger than the computed delay.
    pub fn delay_for_attempt(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let shift = attempt.min(MAX_BACKOFF_SHIFT);
        let scaled = self
            .base_delay
            .checked_mul(1_u32 << shift)
            .unwrap_or(self.max_delay);
        scaled.max(hint.unwrap_or(Duration::ZERO)).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}
