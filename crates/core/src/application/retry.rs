// Enqueue retry logic

use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the enqueue (with backoff delay in ms)
    Retry(i64),
    /// Attempt ceiling reached
    Exhausted,
}

/// Bounded exponential backoff for transport-level enqueue failures.
///
/// Only the Dispatcher consults this - the producer never retries
/// internally, so the guard's idempotency decision stays in one place.
pub struct RetryPolicy {
    base_delay_ms: i64,
    backoff_factor: f64,
    max_attempts: u32,
}

impl RetryPolicy {
    /// # Arguments
    /// * `base_delay_ms` - Delay before the first retry (default: 1000)
    /// * `backoff_factor` - Multiplier per attempt (default: 2.0)
    /// * `max_attempts` - Total enqueue attempts before dead-lettering
    pub fn new(base_delay_ms: i64, backoff_factor: f64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            backoff_factor,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide whether to retry after `attempts` failed enqueue attempts.
    ///
    /// Backoff formula: delay = base_delay * factor^(attempts-1), with ±10%
    /// jitter seeded from the tenant id. The jitter factor is constant per
    /// tenant, so successive delays stay strictly increasing while distinct
    /// tenants still spread out.
    pub fn should_retry(&self, tenant_id: &str, attempts: u32) -> RetryDecision {
        if attempts >= self.max_attempts {
            warn!(
                tenant = %tenant_id,
                attempts = attempts,
                max_attempts = self.max_attempts,
                "Max enqueue attempts reached"
            );
            return RetryDecision::Exhausted;
        }

        let exponent = attempts.saturating_sub(1) as i32;
        let base_delay_ms = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);

        let jitter_seed = tenant_id.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0); // 0.9 to 1.1

        let delay_ms = (base_delay_ms * jitter_factor) as i64;

        info!(
            tenant = %tenant_id,
            attempt = attempts,
            max_attempts = self.max_attempts,
            delay_ms = delay_ms,
            "Scheduling enqueue retry"
        );

        RetryDecision::Retry(delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1000, 2.0, 3)
    }
}
