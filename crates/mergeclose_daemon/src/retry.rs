//! Bounded retry with exponential backoff.

use std::time::Duration;
use tracing::warn;

const MAX_BACKOFF_SECS: f64 = 3600.0;

/// Pause between attempts. Injected so tests run without sleeping.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<S: Sleeper + ?Sized> Sleeper for &mut S {
    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. At least 1.
    pub attempts: u32,
    /// Delay after the first failure; doubles for each further failure.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_secs: f64) -> Self {
        let backoff_secs = if backoff_secs.is_finite() && backoff_secs > 0.0 {
            backoff_secs.min(MAX_BACKOFF_SECS)
        } else {
            0.0
        };
        Self {
            attempts: attempts.max(1),
            backoff: Duration::from_secs_f64(backoff_secs),
        }
    }

    /// `backoff * 2^(attempt-1)`, for 1-based `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff.saturating_mul(1u32 << exponent)
    }
}

/// Outcome of [`with_backoff`]: the final result and how many retries ran.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub retries: u32,
}

/// Run `op` up to `policy.attempts` times, sleeping between failures.
/// The last error is returned once attempts are exhausted.
pub fn with_backoff<T, E, S, F>(policy: &RetryPolicy, sleeper: &mut S, mut op: F) -> Retried<T, E>
where
    E: std::fmt::Display,
    S: Sleeper + ?Sized,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut retries = 0;
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    retries,
                }
            }
            Err(err) if attempt >= policy.attempts => {
                warn!(attempt, error = %err, "retries exhausted");
                return Retried {
                    result: Err(err),
                    retries,
                };
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "attempt failed; backing off");
                sleeper.sleep(delay);
                retries += 1;
                attempt += 1;
            }
        }
    }
}
