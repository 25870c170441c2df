//! Bounded retry with exponential backoff
//!
//! Used for reads that can collide with a concurrent file replacement and
//! for index store calls that hit a briefly busy database.

use std::time::Duration;

/// How often and how patiently to retry a transient failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before the second attempt; doubled after each failure
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_backoff,
            ..Self::default()
        }
    }

    /// Delay to wait before attempt number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed transiently; holds the last error
    Exhausted { last: E, attempts: u32 },
    /// A non-transient failure, returned without further attempts
    Fatal(E),
}

/// Run `op` until it succeeds, fails fatally, or runs out of attempts
pub fn retry<T, E>(
    policy: &RetryPolicy,
    is_transient: impl Fn(&E) -> bool,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        let delay = policy.backoff(attempt);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        match op() {
            Ok(value) => return Ok(value),
            Err(e) if !is_transient(&e) => return Err(RetryError::Fatal(e)),
            Err(e) => {
                attempt += 1;
                tracing::trace!(attempt, error = %e, "transient failure");
                if attempt >= attempts {
                    return Err(RetryError::Exhausted { last: e, attempts });
                }
            }
        }
    }
}
