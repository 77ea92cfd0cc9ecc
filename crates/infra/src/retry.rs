//! Retry with exponential backoff for transient publish failures.
//!
//! Blocking flavour: the order service runs synchronously, so delays use
//! `std::thread::sleep`.

use std::time::Duration;

use tracing::warn;

/// Backoff configuration.
///
/// `max_attempts` counts the first try, so `1` means "no retry".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(millis as u64)
        }
    }
}

/// Run `operation` until it succeeds, the error is not retryable, or attempts run out.
///
/// `operation` receives the 1-based attempt number. The last error is returned.
pub fn retry_with_backoff<T, E, F, R>(
    policy: &RetryPolicy,
    mut retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    R: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts || !retryable(&err) => return Err(err),
            Err(err) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed; retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
