//! Concrete resource kinds.
//!
//! Each kind is a thin variant over the reconciler primitives. Shared steps
//! (idempotent create, existence probe, lenient removal) live here.

mod client_secret;
mod dns_lookup;
mod edge_function;
mod firewall;
mod key_material;
mod network_link;
mod origin_access;
mod response_policy;
mod scaling_group;
mod test_resource;
mod viewer_function;

pub use client_secret::ClientSecretHandler;
pub use dns_lookup::DnsLookupHandler;
pub use edge_function::EdgeFunctionAssociationHandler;
pub use firewall::FirewallHandler;
pub use key_material::KeyMaterialHandler;
pub use network_link::NetworkLinkHandler;
pub use origin_access::OriginAccessControlHandler;
pub use response_policy::ResponsePolicyHandler;
pub use scaling_group::ScalingGroupHandler;
pub use test_resource::TestHandler;
pub use viewer_function::{FunctionFlavor, ViewerFunctionHandler};

use rekon_core::{Error, Result};
use rekon_reconciler::{
    CreateRequest, CreatedObject, ObjectSummary, RemoteObjects, Removal, VersionedObject,
    delete_versioned,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::handler::InvocationContext;

/// Create a remote object under this resource's deterministic client token.
async fn create_object(
    ctx: &InvocationContext,
    remote: &dyn RemoteObjects,
    name: &str,
    discriminator: &str,
    payload: Value,
) -> Result<CreatedObject> {
    ctx.budget.check_or_fail()?;
    let request = CreateRequest {
        name: name.to_string(),
        client_token: ctx.client_token(name, discriminator),
        payload,
    };
    let created = remote.create(request).await?;
    let service = remote.service();
    if created.created {
        info!(service, id = %created.id, name, "Remote object created");
    } else {
        info!(
            service,
            id = %created.id,
            name,
            "Remote object already created by an earlier attempt"
        );
    }
    Ok(created)
}

/// Read an object, mapping absence to `None`.
async fn read_existing(
    ctx: &InvocationContext,
    remote: &dyn RemoteObjects,
    id: &str,
) -> Result<Option<VersionedObject>> {
    ctx.budget.check_or_fail()?;
    match remote.read(id).await {
        Ok(object) => Ok(Some(object)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(Error::from(err)),
    }
}

/// Find an object by its remote name.
async fn find_by_name(
    ctx: &InvocationContext,
    remote: &dyn RemoteObjects,
    name: &str,
) -> Result<Option<ObjectSummary>> {
    ctx.budget.check_or_fail()?;
    let listed = remote.list().await?;
    Ok(listed.into_iter().find(|summary| summary.name == name))
}

/// Delete under the delete policy; absence counts as removed.
async fn remove(
    ctx: &InvocationContext,
    remote: &dyn RemoteObjects,
    id: &str,
) -> Result<Removal> {
    let removal = delete_versioned(&ctx.budget, remote, id, &ctx.config.delete_retry).await?;
    if removal == Removal::AlreadyAbsent {
        info!(service = remote.service(), id, "Nothing to delete");
    }
    Ok(removal)
}

/// Turn a wait timeout into a warning; every other failure propagates.
fn tolerate_timeout(
    result: Result<()>,
    context: &str,
    warnings: &mut Vec<String>,
) -> Result<()> {
    match result {
        Err(err @ Error::Timeout { .. }) => {
            warn!(error = %err, context, "Continuing after timeout");
            warnings.push(format!("{context}: {err}"));
            Ok(())
        }
        other => other,
    }
}

/// Wrap a bare string list as a JSON array.
fn string_array(items: &[String]) -> Value {
    Value::Array(items.iter().cloned().map(Value::String).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerate_timeout_only_absorbs_timeouts() {
        let mut warnings = Vec::new();
        let timed_out = tolerate_timeout(Err(Error::timeout("link", 600)), "wait", &mut warnings);
        assert!(timed_out.is_ok());
        assert_eq!(warnings.len(), 1);
        assert!(warnings.first().is_some_and(|w| w.starts_with("wait: ")));

        let budget = tolerate_timeout(Err(Error::budget_exceeded(1, 2)), "wait", &mut warnings);
        assert!(matches!(budget, Err(Error::BudgetExceeded { .. })));
        assert_eq!(warnings.len(), 1);
    }
}
