//! Invocation time budget.
//!
//! Created once at entry from the remaining-time signal and consulted before
//! every blocking call. Uses `tokio::time::Instant` so tests can run on a
//! paused clock.

use std::time::Duration;

use rekon_core::{Error, Result};
use tokio::time::Instant;
use tracing::warn;

use crate::config::BudgetConfig;

/// Remaining-time signals beyond this are clamped.
const MAX_REMAINING: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone, Copy)]
pub struct Budget {
    started: Instant,
    deadline: Instant,
    emergency_margin: Duration,
    ceiling: Duration,
}

impl Budget {
    /// Open a budget with `remaining` wall-clock time left in the invocation.
    pub fn new(remaining: Duration, config: &BudgetConfig) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started
                .checked_add(remaining)
                .or_else(|| started.checked_add(MAX_REMAINING))
                .unwrap_or(started),
            emergency_margin: config.emergency_margin(),
            ceiling: config.operation_ceiling(),
        }
    }

    /// Time left until the invocation is cut off.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// How long work may block before the next check would fail.
    pub fn headroom(&self) -> Duration {
        let before_margin = self.remaining().saturating_sub(self.emergency_margin);
        let before_ceiling = self.ceiling.saturating_sub(self.elapsed());
        before_margin.min(before_ceiling)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() < self.emergency_margin || self.elapsed() > self.ceiling
    }

    /// Fail with `BudgetExceeded` once inside the emergency margin or past the ceiling.
    ///
    /// # Errors
    ///
    /// Returns `BudgetExceeded` when no further blocking work may start.
    pub fn check_or_fail(&self) -> Result<()> {
        if self.is_exhausted() {
            let err = self.exceeded();
            warn!(error = %err, "Budget check failed");
            Err(err)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early and failing if the budget runs out first.
    ///
    /// # Errors
    ///
    /// Returns `BudgetExceeded` before or after the sleep when the budget is spent.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.check_or_fail()?;
        let nap = duration.min(self.headroom());
        tokio::time::sleep(nap).await;
        if nap < duration {
            let err = self.exceeded();
            warn!(error = %err, requested_ms = millis(duration), "Sleep cut short by budget");
            return Err(err);
        }
        self.check_or_fail()
    }

    fn exceeded(&self) -> Error {
        Error::budget_exceeded(millis(self.remaining()), millis(self.elapsed()))
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
