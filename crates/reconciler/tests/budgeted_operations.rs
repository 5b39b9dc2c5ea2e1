//! Reconciler primitives composed against the in-memory remote.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rekon_core::{Error, RemoteError};
use rekon_reconciler::{
    Budget, EngineConfig, InMemoryObjects, PollPolicy, RemoteObjects, RemoteOp, RemoteStatus,
    Removal, RetryPolicy, delete_versioned, mutate_with, wait_for_status,
};
use serde_json::{Value, json};
use tokio::time::Instant;

fn budget(remaining_secs: u64) -> Budget {
    Budget::new(
        Duration::from_secs(remaining_secs),
        &EngineConfig::default().budget,
    )
}

fn with_comment(payload: &Value) -> Result<Value, Error> {
    let mut next = payload.clone();
    if let Value::Object(map) = &mut next {
        map.insert("Comment".to_string(), json!("managed"));
    }
    Ok(next)
}

#[tokio::test(start_paused = true)]
async fn concurrent_change_survives_retried_write() -> Result<(), String> {
    let remote = InMemoryObjects::new("distributions");
    let id = remote.seed("site", json!({"Comment": "", "Origins": 1})).await;
    let reads = AtomicU32::new(0);
    let config = EngineConfig::default();
    let budget = budget(900);
    let (remote, id, reads) = (&remote, id.as_str(), &reads);

    let mutation = mutate_with(
        &budget,
        &config.conflict_retry,
        "update site",
        move || async move {
            let object = remote.read(id).await.map_err(Error::from)?;
            if reads.fetch_add(1, Ordering::SeqCst) == 0 {
                remote
                    .modify(id, |payload| {
                        if let Value::Object(map) = payload {
                            map.insert("Origins".to_string(), json!(2));
                        }
                    })
                    .await;
            }
            Ok::<_, Error>((object.payload, object.token))
        },
        with_comment,
        move |payload, token| async move {
            remote
                .write(id, payload, &token)
                .await
                .map_err(Error::from)
        },
    )
    .await
    .map_err(|e| e.to_string())?;

    assert!(mutation.was_written());
    assert_eq!(reads.load(Ordering::SeqCst), 2);
    assert_eq!(remote.calls(RemoteOp::Write).await, 2);
    assert_eq!(
        remote.snapshot(id).await,
        Some(json!({"Comment": "managed", "Origins": 2}))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn poll_never_outlives_the_budget() -> Result<(), String> {
    let remote = InMemoryObjects::new("links");
    let id = remote.seed("api", json!({})).await;
    remote
        .script_status(&id, vec![RemoteStatus::new("PENDING")])
        .await;
    let budget = budget(120);
    let started = Instant::now();

    let result = wait_for_status(
        &budget,
        &PollPolicy::convergence(),
        &remote,
        &id,
        &["AVAILABLE"],
        &["FAILED"],
    )
    .await;

    let err = result.err().ok_or("poll should not converge")?;
    assert!(err.is_budget_exceeded());
    assert!(started.elapsed() <= Duration::from_secs(105));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_state_carries_remote_reason() -> Result<(), String> {
    let remote = InMemoryObjects::new("links");
    let id = remote.seed("api", json!({})).await;
    remote
        .script_status(
            &id,
            vec![
                RemoteStatus::new("PENDING"),
                RemoteStatus::new("FAILED").with_reason("subnet exhausted"),
            ],
        )
        .await;

    let err = wait_for_status(
        &budget(900),
        &PollPolicy::convergence(),
        &remote,
        &id,
        &["AVAILABLE"],
        &["FAILED"],
    )
    .await
    .err()
    .ok_or("poll should fail")?;

    assert!(err.to_string().contains("subnet exhausted"));
    assert_eq!(remote.calls(RemoteOp::Status).await, 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn delete_waits_out_dependency_release() -> Result<(), String> {
    let remote = InMemoryObjects::new("public_keys");
    let id = remote.seed("signing", json!({"EncodedKey": "pem"})).await;
    remote
        .fail_times(RemoteOp::Delete, 3, RemoteError::in_use("referenced by key group"))
        .await;

    let removal = delete_versioned(&budget(900), &remote, &id, &RetryPolicy::delete())
        .await
        .map_err(|e| e.to_string())?;

    assert_eq!(removal, Removal::Deleted);
    assert_eq!(remote.calls(RemoteOp::Delete).await, 4);
    assert!(remote.is_empty().await);

    let again = delete_versioned(&budget(900), &remote, &id, &RetryPolicy::delete())
        .await
        .map_err(|e| e.to_string())?;
    assert_eq!(again, Removal::AlreadyAbsent);
    assert_eq!(remote.calls(RemoteOp::Delete).await, 4);
    Ok(())
}
