//! Bounded retry-with-backoff primitives used by the SDK loader and the credential rewrite.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::platform::runtime::sleep;

pub const DEFAULT_INTERVAL_MILLIS: u64 = 100;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
pub const MAX_BACKOFF_MILLIS: u64 = 10_000;
pub const RANDOM_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff_factor: f64,
    /// Adds +/- `RANDOM_FACTOR` jitter to each delay when set.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(DEFAULT_INTERVAL_MILLIS),
        )
    }
}

impl RetryPolicy {
    /// Constant interval between attempts, no jitter. Suited to readiness polling.
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            backoff_factor: 1.0,
            jitter: false,
        }
    }

    pub fn exponential(max_attempts: u32, interval: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            backoff_factor,
            jitter: true,
        }
    }

    /// Delay to wait after the attempt numbered `attempt` (0-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = (self.interval.as_millis() as f64) * self.backoff_factor.powi(attempt as i32);
        let jitter = if self.jitter {
            RANDOM_FACTOR * base * rng.gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        let millis = (base + jitter).round().clamp(0.0, MAX_BACKOFF_MILLIS as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Re-evaluates `check` until it returns `true` or the policy's attempts are used up.
pub async fn poll_until<F>(policy: &RetryPolicy, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for attempt in 0..policy.max_attempts {
        if check() {
            return true;
        }
        if attempt + 1 < policy.max_attempts {
            sleep(policy.delay_for(attempt)).await;
        }
    }
    false
}

/// Runs `operation` until it succeeds, `should_retry` rejects the error, or the attempts
/// are exhausted. The last error is returned on failure.
pub async fn retry_async<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt + 1 >= policy.max_attempts || !should_retry(&err) {
                    return Err(err);
                }
                sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}
