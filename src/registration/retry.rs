// src/registration/retry.rs

//! Retry combinator and backoff schedule.
//!
//! [`register_with_retry`] knows nothing about the call it wraps: the attempt
//! budget and the delay between attempts both come from a [`RetryPolicy`]
//! value, so tests express "try exactly once" as
//! [`RetryPolicy::single_attempt`] instead of patching the call site.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// Delay schedule between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Backoff {
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Backoff::Exponential {
            initial,
            max,
            multiplier: 2.0,
        }
    }

    /// Delay to wait after the `failures`-th consecutive failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exp = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exp);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

/// Bounded (or unbounded) attempt budget plus a backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: Option<u32>, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Exactly one attempt, no delay.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: Some(1),
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    pub fn unbounded(backoff: Backoff) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }

    fn is_last_attempt(&self, attempt: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempt >= max.max(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Backoff::exponential(
            Duration::from_secs(1),
            Duration::from_secs(60),
        ))
    }
}

/// The last error seen once the attempt budget ran out.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last: E,
}

/// Run `op` until it succeeds or `policy` runs out of attempts.
///
/// Every attempt performs the full call again; `op` must therefore be safe to
/// repeat.
pub async fn register_with_retry<T, E, F, Fut>(
    mut op: F,
    policy: &RetryPolicy,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        debug!(attempt, "starting attempt");

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if policy.is_last_attempt(attempt) {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last: err,
                    });
                }

                let delay = policy.backoff.delay_for(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed; backing off"
                );
                sleep(delay).await;
            }
        }
    }
}
