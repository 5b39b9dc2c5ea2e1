//! Private network link between an API front door and a set of subnets.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use rekon_core::{Properties, ResourceOutput, Result};
use rekon_reconciler::{RemoteObjects, Removal, mutate_object, wait_for_status, wait_until_absent};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::{create_object, read_existing, remove, string_array, tolerate_timeout};
use crate::handler::{InvocationContext, ResourceHandler};

const AVAILABLE: &str = "AVAILABLE";
const FAILED: &str = "FAILED";

/// Handler for `NetworkLink`.
pub struct NetworkLinkHandler {
    links: Arc<dyn RemoteObjects>,
}

impl NetworkLinkHandler {
    pub fn new(links: Arc<dyn RemoteObjects>) -> Self {
        Self { links }
    }

    async fn wait_available(&self, ctx: &InvocationContext, id: &str) -> Result<String> {
        let status = wait_for_status(
            &ctx.budget,
            &ctx.config.convergence,
            self.links.as_ref(),
            id,
            &[AVAILABLE],
            &[FAILED],
        )
        .await?;
        Ok(status.state)
    }

    fn output(ctx: &InvocationContext, id: &str, name: &str, state: String) -> ResourceOutput {
        ResourceOutput::new(id)
            .with("LinkId", id)
            .with("LinkArn", ctx.arn("apigateway", &format!("/vpclinks/{id}")))
            .with("Status", state)
            .with("Name", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LinkSpec {
    name: String,
    subnet_ids: Vec<String>,
    security_group_ids: Vec<String>,
    tags: Map<String, Value>,
}

impl LinkSpec {
    fn from_properties(props: &Properties) -> Result<Self> {
        Ok(Self {
            name: props.require_str("Name")?.to_string(),
            subnet_ids: props.require_list("SubnetIds")?,
            security_group_ids: props.string_list("SecurityGroupIds"),
            tags: props.tags("Tags"),
        })
    }

    fn payload(&self) -> Value {
        let mut payload = json!({
            "Name": self.name,
            "SubnetIds": string_array(&self.subnet_ids),
        });
        if let Value::Object(map) = &mut payload {
            if !self.security_group_ids.is_empty() {
                map.insert(
                    "SecurityGroupIds".to_string(),
                    string_array(&self.security_group_ids),
                );
            }
            if !self.tags.is_empty() {
                map.insert("Tags".to_string(), Value::Object(self.tags.clone()));
            }
        }
        payload
    }
}

fn id_set(payload: &Value, key: &str) -> BTreeSet<String> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Replacement-only fields that differ from the live link.
fn replacement_drift(current: &Value, desired: &LinkSpec) -> Vec<&'static str> {
    let mut drift = Vec::new();
    let subnets: BTreeSet<String> = desired.subnet_ids.iter().cloned().collect();
    if id_set(current, "SubnetIds") != subnets {
        drift.push("SubnetIds");
    }
    let groups: BTreeSet<String> = desired.security_group_ids.iter().cloned().collect();
    if !groups.is_empty() && id_set(current, "SecurityGroupIds") != groups {
        drift.push("SecurityGroupIds");
    }
    drift
}

#[async_trait]
impl ResourceHandler for NetworkLinkHandler {
    fn kind(&self) -> &str {
        "NetworkLink"
    }

    async fn create(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let spec = LinkSpec::from_properties(ctx.properties())?;
        info!(name = %spec.name, subnets = spec.subnet_ids.len(), "Creating network link");

        let created =
            create_object(ctx, self.links.as_ref(), &spec.name, "", spec.payload()).await?;
        let state = self.wait_available(ctx, &created.id).await?;
        Ok(Self::output(ctx, &created.id, &spec.name, state))
    }

    async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        let spec = LinkSpec::from_properties(ctx.properties())?;

        let Some(current) = read_existing(ctx, self.links.as_ref(), id).await? else {
            warn!(id, "Network link not found, recreating");
            return self.create(ctx).await;
        };

        let mut warnings = Vec::new();
        let drift = replacement_drift(&current.payload, &spec);
        if !drift.is_empty() {
            let fields = drift.join(", ");
            warn!(id, fields = %fields, "Fields require replacement, updating name only");
            warnings.push(format!("{fields} change requires replacement; only Name was updated"));
        }

        let name = spec.name.clone();
        let renamed = mutate_object(
            &ctx.budget,
            &ctx.config.conflict_retry,
            self.links.as_ref(),
            id,
            move |payload| {
                let mut next = payload.clone();
                if let Value::Object(map) = &mut next {
                    map.insert("Name".to_string(), Value::String(name.clone()));
                }
                Ok(next)
            },
        )
        .await;
        match renamed {
            Err(err) if err.is_not_found() => {
                warn!(id, "Network link vanished during update, recreating");
                return self.create(ctx).await;
            }
            other => {
                other?;
            }
        }

        let state = self.wait_available(ctx, id).await?;
        Ok(Self::output(ctx, id, &spec.name, state).with_warnings(warnings))
    }

    async fn delete(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        let mut warnings = Vec::new();

        if remove(ctx, self.links.as_ref(), id).await? == Removal::Deleted {
            let waited = wait_until_absent(
                &ctx.budget,
                &ctx.config.convergence.capped_at(ctx.budget.headroom()),
                self.links.as_ref(),
                id,
            )
            .await;
            tolerate_timeout(waited, "waiting for link removal", &mut warnings)?;
            info!(id, "Network link deleted");
        }
        Ok(ResourceOutput::new(id).with_warnings(warnings))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use rekon_core::{Error, Outcome, RemoteError, Verb};
    use rekon_reconciler::{InMemoryObjects, RemoteOp, RemoteStatus};

    use super::*;
    use crate::handler::run;
    use crate::testing::{context, update_context};

    fn props() -> Value {
        json!({"ResourceType": "NetworkLink", "Name": "edge", "SubnetIds": "subnet-a, subnet-b"})
    }

    fn handler(links: &Arc<InMemoryObjects>) -> NetworkLinkHandler {
        NetworkLinkHandler::new(links.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_for_available() {
        let links = Arc::new(InMemoryObjects::new("links"));
        links
            .script_status("edge", vec![RemoteStatus::new("PENDING"), RemoteStatus::new(AVAILABLE)])
            .await;

        let ctx = context("NetworkLink", Verb::Create, props(), None);
        let output = handler(&links).create(&ctx).await.unwrap();

        assert_eq!(output.data["Status"], AVAILABLE);
        assert_eq!(output.data["Name"], "edge");
        assert_eq!(
            output.data["LinkArn"],
            format!("arn:aws:apigateway:us-east-1::/vpclinks/{}", output.physical_id)
        );
        assert_eq!(links.calls(RemoteOp::Status).await, 2);
        let stored = links.snapshot(&output.physical_id).await.unwrap();
        assert_eq!(stored["SubnetIds"], json!(["subnet-a", "subnet-b"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_is_stable_across_retries() {
        let links = Arc::new(InMemoryObjects::new("links"));
        let ctx = context("NetworkLink", Verb::Create, props(), None);
        let first = handler(&links).create(&ctx).await.unwrap();
        let second = handler(&links).create(&ctx).await.unwrap();
        assert_eq!(first.physical_id, second.physical_id);
        assert_eq!(links.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_fails_with_remote_reason() {
        let links = Arc::new(InMemoryObjects::new("links"));
        links
            .script_status("edge", vec![RemoteStatus::new(FAILED).with_reason("subnet full")])
            .await;
        let ctx = context("NetworkLink", Verb::Create, props(), None);
        let err = handler(&links).create(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::ResourceFailed { ref reason, .. } if reason == "subnet full"));
    }

    #[tokio::test]
    async fn test_create_requires_subnets() {
        let links = Arc::new(InMemoryObjects::new("links"));
        let ctx = context("NetworkLink", Verb::Create, json!({"Name": "edge"}), None);
        let err = handler(&links).create(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidProperties { .. }));
        assert!(links.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_with_same_properties_writes_nothing() {
        let links = Arc::new(InMemoryObjects::new("links"));
        let ctx = context("NetworkLink", Verb::Create, props(), None);
        let id = handler(&links).create(&ctx).await.unwrap().physical_id;

        let update = update_context("NetworkLink", props(), props(), &id);
        let output = handler(&links).update(&update).await.unwrap();

        assert_eq!(output.physical_id, id);
        assert!(output.warnings.is_empty());
        assert_eq!(links.calls(RemoteOp::Write).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_subnet_drift_is_a_warning() {
        let links = Arc::new(InMemoryObjects::new("links"));
        let ctx = context("NetworkLink", Verb::Create, props(), None);
        let id = handler(&links).create(&ctx).await.unwrap().physical_id;

        let changed = json!({"Name": "edge-2", "SubnetIds": ["subnet-c"]});
        let output = handler(&links)
            .update(&update_context("NetworkLink", changed, props(), &id))
            .await
            .unwrap();

        assert_eq!(output.warnings.len(), 1);
        let stored = links.snapshot(&id).await.unwrap();
        assert_eq!(stored["Name"], "edge-2");
        assert_eq!(stored["SubnetIds"], json!(["subnet-a", "subnet-b"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_missing_link_recreates() {
        let links = Arc::new(InMemoryObjects::new("links"));
        let update = update_context("NetworkLink", props(), props(), "links-gone");
        let output = handler(&links).update(&update).await.unwrap();
        assert_ne!(output.physical_id, "links-gone");
        assert_eq!(links.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_absent_link_succeeds_without_retry() {
        let links = Arc::new(InMemoryObjects::new("links"));
        let ctx = context("NetworkLink", Verb::Delete, props(), Some("links-gone"));
        let outcome = run(&handler(&links), &ctx).await;
        assert!(outcome.is_success());
        assert_eq!(links.calls(RemoteOp::Delete).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_fatal_is_lenient() {
        let links = Arc::new(InMemoryObjects::new("links"));
        let id = links.seed("edge", props()).await;
        links
            .fail_next(RemoteOp::Delete, RemoteError::fatal("access denied"))
            .await;

        let ctx = context("NetworkLink", Verb::Delete, props(), Some(&id));
        let outcome = run(&handler(&links), &ctx).await;

        assert!(matches!(outcome, Outcome::LenientFailure { .. }));
        assert!(outcome.is_success());
        assert_eq!(outcome.data()["Status"], "DeleteFailed");
        assert!(outcome.data()["Error"].as_str().unwrap().contains("access denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_link() {
        let links = Arc::new(InMemoryObjects::new("links"));
        let id = links.seed("edge", props()).await;
        let ctx = context("NetworkLink", Verb::Delete, props(), Some(&id));
        let output = handler(&links).delete(&ctx).await.unwrap();
        assert!(output.warnings.is_empty());
        assert!(links.is_empty().await);
    }
}
