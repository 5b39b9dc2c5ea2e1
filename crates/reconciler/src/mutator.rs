//! Version-token read-modify-write.
//!
//! Every attempt re-reads the object and re-applies the transform to the
//! latest payload, so a retry never writes over a concurrent change.

use std::future::Future;

use rekon_core::{Error, Result};
use serde_json::Value;
use tracing::{debug, info};

use crate::budget::Budget;
use crate::config::RetryPolicy;
use crate::remote::{RemoteObjects, VersionToken};
use crate::retry::{self, Attempted};

/// Result of a read-modify-write cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// The transformed payload was written.
    Written { token: VersionToken, payload: Value },
    /// The transform produced the current payload; nothing was written.
    Unchanged { token: VersionToken, payload: Value },
}

impl Mutation {
    pub const fn payload(&self) -> &Value {
        match self {
            Self::Written { payload, .. } | Self::Unchanged { payload, .. } => payload,
        }
    }

    pub const fn token(&self) -> &VersionToken {
        match self {
            Self::Written { token, .. } | Self::Unchanged { token, .. } => token,
        }
    }

    pub const fn was_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Outcome of a lenient versioned delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Deleted,
    AlreadyAbsent,
}

/// Read, transform, and write back under the conflict policy.
///
/// `transform` must be pure: it is re-invoked on every attempt.
///
/// # Errors
///
/// Propagates `NotFound` unchanged, surfaces transform errors immediately,
/// and returns `RetriesExhausted` when conflicts outlast the policy.
pub async fn mutate_with<R, RF, W, WF, T>(
    budget: &Budget,
    policy: &RetryPolicy,
    operation: &str,
    read: R,
    transform: T,
    write: W,
) -> Result<Mutation>
where
    R: Fn() -> RF,
    RF: Future<Output = Result<(Value, VersionToken)>>,
    W: Fn(Value, VersionToken) -> WF,
    WF: Future<Output = Result<VersionToken>>,
    T: Fn(&Value) -> Result<Value>,
{
    let (read, write, transform) = (&read, &write, &transform);

    let attempted = retry::execute(budget, policy, operation, move |attempt| async move {
        let (current, token) = read().await?;
        let next = transform(&current)?;
        if next == current {
            debug!(operation, attempt, "Payload already in desired state");
            return Ok::<_, Error>(Mutation::Unchanged {
                token,
                payload: current,
            });
        }
        budget.check_or_fail()?;
        let token = write(next.clone(), token).await?;
        debug!(operation, attempt, token = %token, "Payload written");
        Ok::<_, Error>(Mutation::Written {
            token,
            payload: next,
        })
    })
    .await?;

    attempted.into_result()
}

/// [`mutate_with`] against a remote object.
///
/// # Errors
///
/// See [`mutate_with`].
pub async fn mutate_object<T>(
    budget: &Budget,
    policy: &RetryPolicy,
    remote: &dyn RemoteObjects,
    id: &str,
    transform: T,
) -> Result<Mutation>
where
    T: Fn(&Value) -> Result<Value>,
{
    let operation = format!("update {} '{id}'", remote.service());
    let mutation = mutate_with(
        budget,
        policy,
        &operation,
        || async move {
            let object = remote.read(id).await?;
            Ok::<_, Error>((object.payload, object.token))
        },
        transform,
        |payload, token| async move {
            remote
                .write(id, payload, &token)
                .await
                .map_err(Error::from)
        },
    )
    .await?;

    if mutation.was_written() {
        info!(service = remote.service(), id, "Remote object updated");
    }
    Ok(mutation)
}

/// Delete with a fresh token per attempt, treating absence as success.
///
/// # Errors
///
/// Returns `RetriesExhausted` when the object stays in use past the policy,
/// or the first non-retryable failure.
pub async fn delete_versioned(
    budget: &Budget,
    remote: &dyn RemoteObjects,
    id: &str,
    policy: &RetryPolicy,
) -> Result<Removal> {
    let operation = format!("delete {} '{id}'", remote.service());
    let attempted = retry::execute(budget, policy, &operation, |_| async move {
        let object = remote.read(id).await?;
        remote.delete(id, &object.token).await?;
        Ok::<_, Error>(())
    })
    .await?;

    match attempted {
        Attempted::Done(()) => {
            info!(service = remote.service(), id, "Remote object deleted");
            Ok(Removal::Deleted)
        }
        Attempted::Absent(_) => {
            info!(service = remote.service(), id, "Remote object already absent");
            Ok(Removal::AlreadyAbsent)
        }
    }
}
