//! Convergence poller.
//!
//! Polls a status accessor until it reports a terminal state, the wait
//! allowance runs out, or the invocation budget does. The budget always wins:
//! a wait longer than the remaining budget fails with `BudgetExceeded`.

use std::future::Future;

use rekon_core::{Error, RemoteError, Result, RetryClass, classify_remote};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::budget::Budget;
use crate::config::PollPolicy;
use crate::remote::{RemoteObjects, RemoteStatus};

/// Poll `accessor` until `is_success` or `is_failure` holds.
///
/// Transient remote errors from the accessor are logged and polled through.
///
/// # Errors
///
/// Returns `ResourceFailed` with the remote's reason on a terminal failure,
/// `Timeout` once `max_wait` elapses, `BudgetExceeded` when the budget runs
/// out first, or any non-transient accessor error.
pub async fn wait_until<T, A, AF, S, F>(
    budget: &Budget,
    what: &str,
    policy: &PollPolicy,
    accessor: A,
    is_success: S,
    is_failure: F,
) -> Result<T>
where
    A: Fn() -> AF,
    AF: Future<Output = Result<T>>,
    S: Fn(&T) -> bool,
    F: Fn(&T) -> Option<String>,
{
    let started = Instant::now();
    let mut polls: u32 = 0;

    loop {
        budget.check_or_fail()?;
        polls = polls.saturating_add(1);

        match accessor().await {
            Ok(status) => {
                if let Some(reason) = is_failure(&status) {
                    warn!(what, polls, reason = %reason, "Remote reported failure");
                    return Err(Error::resource_failed(what, reason));
                }
                if is_success(&status) {
                    let waited_ms = crate::budget::millis(started.elapsed());
                    info!(what, polls, waited_ms, "Converged");
                    return Ok(status);
                }
                debug!(what, polls, "Not yet converged");
            }
            Err(Error::Remote(remote)) if is_transient(&remote) => {
                warn!(what, polls, error = %remote, "Status check failed, polling on");
            }
            Err(other) => return Err(other),
        }

        let waited = started.elapsed();
        if waited >= policy.max_wait() {
            warn!(what, polls, "Gave up waiting for convergence");
            return Err(Error::timeout(what, waited.as_secs()));
        }
        let nap = policy.interval().min(policy.max_wait().saturating_sub(waited));
        budget.sleep(nap).await?;
    }
}

fn is_transient(error: &RemoteError) -> bool {
    classify_remote(error) == RetryClass::Transient
}

/// Wait for a remote object to report one of `success` states.
///
/// Any of `failure` states ends the wait with the remote-provided reason.
///
/// # Errors
///
/// See [`wait_until`].
pub async fn wait_for_status(
    budget: &Budget,
    policy: &PollPolicy,
    remote: &dyn RemoteObjects,
    id: &str,
    success: &[&str],
    failure: &[&str],
) -> Result<RemoteStatus> {
    let what = format!("{} '{id}'", remote.service());
    wait_until(
        budget,
        &what,
        policy,
        || async move { remote.status(id).await.map_err(Error::from) },
        |status: &RemoteStatus| success.iter().any(|state| status.is(state)),
        |status: &RemoteStatus| {
            failure.iter().any(|state| status.is(state)).then(|| {
                status
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("entered state {}", status.state))
            })
        },
    )
    .await
}

/// Wait until the remote no longer knows the object.
///
/// # Errors
///
/// See [`wait_until`].
pub async fn wait_until_absent(
    budget: &Budget,
    policy: &PollPolicy,
    remote: &dyn RemoteObjects,
    id: &str,
) -> Result<()> {
    let what = format!("removal of {} '{id}'", remote.service());
    wait_until(
        budget,
        &what,
        policy,
        || async move {
            match remote.status(id).await {
                Ok(status) => Ok(Some(status)),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(Error::from(err)),
            }
        },
        Option::is_none,
        |_| None,
    )
    .await
    .map(|_| ())
}
