//! Engine policies supplied at construction time.

use std::time::Duration;

use rekon_core::{Error, RemoteError, Result, RetryClass, classify_remote};
use serde::{Deserialize, Serialize};

/// Maps a remote failure to a retry decision.
pub type Classifier = fn(&RemoteError) -> RetryClass;

/// Invocation time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Remaining time below which no further blocking work starts.
    #[serde(default = "default_emergency_margin")]
    pub emergency_margin_ms: u64,

    /// Absolute ceiling on elapsed time, independent of the remaining-time signal.
    #[serde(default = "default_operation_ceiling")]
    pub operation_ceiling_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            emergency_margin_ms: default_emergency_margin(),
            operation_ceiling_ms: default_operation_ceiling(),
        }
    }
}

impl BudgetConfig {
    pub const fn emergency_margin(&self) -> Duration {
        Duration::from_millis(self.emergency_margin_ms)
    }

    pub const fn operation_ceiling(&self) -> Duration {
        Duration::from_millis(self.operation_ceiling_ms)
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(skip, default = "default_classifier")]
    pub classify: Classifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::conflict()
    }
}

impl RetryPolicy {
    /// Policy for detach-then-delete: long waits while dependencies release.
    pub const fn delete() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 2_000,
            max_delay_ms: 300_000,
            classify: classify_remote,
        }
    }

    /// Policy for stale-token write conflicts: seconds-scale.
    pub const fn conflict() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            classify: classify_remote,
        }
    }

    /// Replace the classifier.
    #[must_use]
    pub const fn with_classifier(mut self, classify: Classifier) -> Self {
        self.classify = classify;
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Validate the policy.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the policy could never make an attempt.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config(format!("{name}.max_attempts must be greater than 0")));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::config(format!(
                "{name}.base_delay_ms must not exceed max_delay_ms"
            )));
        }
        Ok(())
    }
}

/// Convergence polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,

    #[serde(default = "default_convergence_wait")]
    pub max_wait_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::convergence()
    }
}

impl PollPolicy {
    /// Provisioning of a newly created object.
    pub const fn convergence() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            max_wait_ms: default_convergence_wait(),
        }
    }

    /// Propagation of a composite config change to the edge.
    pub const fn propagation() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            max_wait_ms: 900_000,
        }
    }

    /// This policy with its wait shortened to end within `limit`.
    #[must_use]
    pub fn capped_at(&self, limit: Duration) -> Self {
        let limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
        Self {
            max_wait_ms: self.max_wait_ms.min(limit_ms),
            ..*self
        }
    }

    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub const fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Validate the policy.
    ///
    /// # Errors
    ///
    /// Returns `Config` on a zero interval.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::config(format!("{name}.interval_ms must be greater than 0")));
        }
        Ok(())
    }
}

/// Everything the engine needs, fixed for the life of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default = "RetryPolicy::delete")]
    pub delete_retry: RetryPolicy,

    #[serde(default = "RetryPolicy::conflict")]
    pub conflict_retry: RetryPolicy,

    #[serde(default = "PollPolicy::convergence")]
    pub convergence: PollPolicy,

    #[serde(default = "PollPolicy::propagation")]
    pub propagation: PollPolicy,

    /// Used only to render identifiers in callback data.
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_partition")]
    pub partition: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            budget: BudgetConfig::default(),
            delete_retry: RetryPolicy::delete(),
            conflict_retry: RetryPolicy::conflict(),
            convergence: PollPolicy::convergence(),
            propagation: PollPolicy::propagation(),
            region: default_region(),
            partition: default_partition(),
        }
    }
}

impl EngineConfig {
    /// Validate every policy.
    ///
    /// # Errors
    ///
    /// Returns the first `Config` error found.
    pub fn validate(&self) -> Result<()> {
        self.delete_retry.validate("delete_retry")?;
        self.conflict_retry.validate("conflict_retry")?;
        self.convergence.validate("convergence")?;
        self.propagation.validate("propagation")?;
        if self.budget.emergency_margin_ms >= self.budget.operation_ceiling_ms {
            return Err(Error::config(
                "budget.emergency_margin_ms must be below budget.operation_ceiling_ms",
            ));
        }
        Ok(())
    }
}

const fn default_emergency_margin() -> u64 {
    15_000
}

const fn default_operation_ceiling() -> u64 {
    840_000
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay() -> u64 {
    500
}

const fn default_max_delay() -> u64 {
    8_000
}

fn default_classifier() -> Classifier {
    classify_remote
}

const fn default_poll_interval() -> u64 {
    15_000
}

const fn default_convergence_wait() -> u64 {
    600_000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_partition() -> String {
    "aws".to_string()
}
