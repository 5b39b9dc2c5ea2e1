//! Bounded exponential-backoff retrier.
//!
//! Only remote failures are classified. Local errors (validation, budget)
//! end the loop immediately and surface unchanged.

use std::future::Future;
use std::time::Duration;

use rekon_core::{Error, RemoteError, Result, RetryClass};
use tracing::{debug, warn};

use crate::budget::Budget;
use crate::config::RetryPolicy;

/// Calculate backoff duration with exponential growth.
///
/// `delay_n = min(base * 2^n, max)` with saturating arithmetic.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let backoff = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(backoff.min(max_ms))
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms)
    }
}

/// Result of a retried operation that may find its target gone.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempted<T> {
    Done(T),
    /// The remote reported the target absent.
    Absent(RemoteError),
}

impl<T> Attempted<T> {
    /// Treat absence as an error.
    ///
    /// # Errors
    ///
    /// Returns the remote `NotFound` for `Absent`.
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Done(value) => Ok(value),
            Self::Absent(remote) => Err(Error::Remote(remote)),
        }
    }
}

/// Run `attempt_fn` under `policy`, sleeping between attempts via the budget.
///
/// `attempt_fn` receives the zero-based attempt index. Transient and
/// conflict failures are retried; `NotFound` yields [`Attempted::Absent`];
/// anything else stops the loop.
///
/// # Errors
///
/// Returns `RetriesExhausted` with the last remote error once the attempt cap
/// is reached, `BudgetExceeded` if the budget runs out, or the first
/// non-retryable error.
pub async fn execute<T, F, Fut>(
    budget: &Budget,
    policy: &RetryPolicy,
    operation: &str,
    mut attempt_fn: F,
) -> Result<Attempted<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last = None;

    for attempt in 0..policy.max_attempts {
        budget.check_or_fail()?;

        let remote = match attempt_fn(attempt).await {
            Ok(value) => return Ok(Attempted::Done(value)),
            Err(Error::Remote(remote)) => remote,
            Err(other) => return Err(other),
        };

        match (policy.classify)(&remote) {
            RetryClass::NotFound => {
                debug!(operation, attempt, "Target absent");
                return Ok(Attempted::Absent(remote));
            }
            RetryClass::Fatal => {
                warn!(operation, attempt, error = %remote, "Non-retryable failure");
                return Err(Error::Remote(remote));
            }
            RetryClass::Transient | RetryClass::Conflict => {
                if attempt.saturating_add(1) < policy.max_attempts {
                    let delay = policy.backoff_delay(attempt);
                    debug!(
                        operation,
                        attempt,
                        delay_ms = crate::budget::millis(delay),
                        error = %remote,
                        "Retrying after backoff"
                    );
                    budget.sleep(delay).await?;
                }
                last = Some(remote);
            }
        }
    }

    let last = last.unwrap_or_else(|| RemoteError::fatal("retry policy permits no attempts"));
    warn!(operation, attempts = policy.max_attempts, error = %last, "Retries exhausted");
    Err(Error::retries_exhausted(operation, policy.max_attempts, last))
}
