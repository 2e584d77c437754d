//! Retry and pacing primitives for session wrappers.
//!
//! Rate limiting (minimum inter-call spacing) and transient-fault retry are
//! enforced here, inside the session layer, so call sites never carry retry
//! loops of their own.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::BrokerError;

/// Bounded exponential backoff: `base × 2^(attempt-1)`, capped at `max_delay`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before the given attempt (1-based). Attempt 1 has no delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let shift = (attempt - 2).min(31);
        let exp = self.base_delay.saturating_mul(1u32 << shift);
        exp.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Run `op` under the policy, retrying transient broker faults with backoff.
/// Non-transient errors and exhausted budgets surface immediately.
pub fn with_retry<T, F>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, BrokerError>
where
    F: FnMut() -> Result<T, BrokerError>,
{
    let mut last = BrokerError::Transport {
        detail: format!("{label}: no attempts made"),
    };
    for attempt in 1..=policy.max_attempts.max(1) {
        let delay = policy.delay_for(attempt);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() => {
                warn!(operation = label, attempt, error = %e, "transient broker fault, retrying");
                last = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last)
}

/// Minimum inter-call spacing, enforced by sleeping the remainder.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: None,
        }
    }

    /// Block until at least `min_interval` has passed since the last call.
    pub fn pace(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        self.last_call = Some(Instant::now());
    }
}
