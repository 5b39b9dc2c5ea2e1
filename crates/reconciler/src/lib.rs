//! Budgeted reconciliation primitives for custom-resource handlers.
//!
//! Every blocking step of a lifecycle operation goes through this crate:
//!
//! - **Budget**: the shrinking time allowance of one invocation
//! - **Retry**: bounded exponential backoff over classified remote failures
//! - **Mutator**: read-modify-write guarded by version tokens
//! - **Poller**: waits for asynchronous remote convergence
//! - **Normalizer**: deterministic cleanup of composite configs before a write
//!
//! Remote systems are reached only through the [`RemoteObjects`] capability.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use rekon_reconciler::{Budget, EngineConfig, InMemoryObjects, mutate_object};
//!
//! let config = EngineConfig::default();
//! let budget = Budget::new(Duration::from_secs(900), &config.budget);
//! let remote = InMemoryObjects::new("distributions");
//! let id = remote.seed("site", serde_json::json!({"Comment": ""})).await;
//!
//! mutate_object(&budget, &config.conflict_retry, &remote, &id, |payload| {
//!     let mut next = payload.clone();
//!     next["Comment"] = "managed".into();
//!     Ok(next)
//! })
//! .await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod budget;
pub mod config;
pub mod mutator;
pub mod normalize;
pub mod poller;
pub mod remote;
pub mod retry;

// Re-export main types
pub use budget::Budget;
pub use config::{BudgetConfig, Classifier, EngineConfig, PollPolicy, RetryPolicy};
pub use mutator::{Mutation, Removal, delete_versioned, mutate_object, mutate_with};
pub use normalize::{NormalizeRules, normalize};
pub use poller::{wait_for_status, wait_until, wait_until_absent};
pub use remote::{
    CreateRequest, CreatedObject, InMemoryObjects, ObjectSummary, RemoteObjects, RemoteOp,
    RemoteResult, RemoteStatus, VersionToken, VersionedObject,
};
pub use retry::{Attempted, calculate_backoff, execute};
