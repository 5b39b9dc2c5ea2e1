//! Attaches a viewer-request edge function to protected paths of a distribution.
//!
//! Every write goes through the distribution normalizer. Both transforms are
//! pure, so a conflict retry re-applies them to the freshly read config.

use std::sync::Arc;

use async_trait::async_trait;
use rekon_core::{Properties, ResourceOutput, Result};
use rekon_reconciler::{NormalizeRules, RemoteObjects, mutate_object, normalize, wait_for_status};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::tolerate_timeout;
use crate::handler::{InvocationContext, ResourceHandler};

const DEPLOYED: &str = "Deployed";
const VIEWER_REQUEST: &str = "viewer-request";
const DEFAULT_ORIGIN_ID: &str = "SelfOrigin";
/// Managed policy honouring origin cache headers and query strings.
const DEFAULT_CACHE_POLICY_ID: &str = "4cc15a8a-d715-48a4-82b8-cc0b614638fe";
const ASSOCIATION_KEYS: [&str; 2] = ["FunctionAssociations", "LambdaFunctionAssociations"];

/// Handler for `EdgeFunctionAssociation`.
pub struct EdgeFunctionAssociationHandler {
    distributions: Arc<dyn RemoteObjects>,
    rules: NormalizeRules,
}

#[derive(Debug, Clone, PartialEq)]
struct AssociationSpec {
    distribution_id: String,
    patterns: Vec<String>,
    function_arn: String,
    cache_policy_id: String,
    response_policy_id: Option<String>,
    origin_id: String,
    origin_domain: Option<String>,
}

fn path_patterns(props: &Properties) -> Vec<String> {
    props
        .string_list("ProtectedPaths")
        .iter()
        .map(|path| format!("{path}*"))
        .collect()
}

impl AssociationSpec {
    fn from_properties(props: &Properties) -> Result<Self> {
        props.require_fields(&["DistributionId", "ViewerRequestFunctionArn"])?;
        let response_policy_id = props.opt_str("NoCachePolicyId").map(str::to_string);
        if response_policy_id.is_none() {
            warn!("NoCachePolicyId not provided, protected paths use default caching");
        }
        Ok(Self {
            distribution_id: props.require_str("DistributionId")?.to_string(),
            patterns: path_patterns(props),
            function_arn: props.require_str("ViewerRequestFunctionArn")?.to_string(),
            cache_policy_id: props
                .opt_str("CachePolicyId")
                .unwrap_or(DEFAULT_CACHE_POLICY_ID)
                .to_string(),
            response_policy_id,
            origin_id: props
                .opt_str("OriginId")
                .unwrap_or(DEFAULT_ORIGIN_ID)
                .to_string(),
            origin_domain: props.opt_str("OriginDomainName").map(str::to_string),
        })
    }

    fn physical_id(&self) -> String {
        format!("edge-association-{}", self.distribution_id)
    }

    fn viewer_request(&self) -> Value {
        json!({"EventType": VIEWER_REQUEST, "FunctionARN": self.function_arn})
    }

    fn new_behavior(&self, pattern: &str) -> Value {
        let mut behavior = json!({
            "PathPattern": pattern,
            "TargetOriginId": self.origin_id,
            "ViewerProtocolPolicy": "redirect-to-https",
            "AllowedMethods": {
                "Quantity": 2,
                "Items": ["GET", "HEAD"],
                "CachedMethods": {"Quantity": 2, "Items": ["GET", "HEAD"]},
            },
            "SmoothStreaming": false,
            "CachePolicyId": self.cache_policy_id,
            "Compress": true,
            "FunctionAssociations": {"Quantity": 1, "Items": [self.viewer_request()]},
            "LambdaFunctionAssociations": {"Quantity": 0, "Items": []},
            "TrustedKeyGroups": {"Enabled": false, "Quantity": 0},
            "TrustedSigners": {"Enabled": false, "Quantity": 0},
            "FieldLevelEncryptionId": "",
        });
        if let (Some(policy), Value::Object(map)) = (&self.response_policy_id, &mut behavior) {
            map.insert("ResponseHeadersPolicyId".to_string(), json!(policy));
        }
        behavior
    }

    fn origin(&self, domain: &str) -> Value {
        json!({
            "Id": self.origin_id,
            "DomainName": domain,
            "OriginPath": "",
            "CustomHeaders": {"Quantity": 0},
            "CustomOriginConfig": {
                "HTTPPort": 443,
                "HTTPSPort": 443,
                "OriginProtocolPolicy": "https-only",
                "OriginSslProtocols": {"Quantity": 1, "Items": ["TLSv1.2"]},
                "OriginReadTimeout": 30,
                "OriginKeepaliveTimeout": 5,
            },
            "ConnectionAttempts": 3,
            "ConnectionTimeout": 10,
            "OriginShield": {"Enabled": false},
        })
    }
}

/// Mutable `Items` of a counted collection, created when missing or malformed.
fn items_mut<'a>(root: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Vec<Value>> {
    let collection = root
        .entry(key)
        .or_insert_with(|| json!({"Quantity": 0, "Items": []}));
    if !collection.is_object() {
        *collection = json!({"Quantity": 0, "Items": []});
    }
    collection
        .as_object_mut()?
        .entry("Items")
        .or_insert_with(|| json!([]))
        .as_array_mut()
}

fn pattern_of(behavior: &Value) -> Option<&str> {
    behavior.get("PathPattern").and_then(Value::as_str)
}

fn set_viewer_request(behavior: &mut Value, association: &Value) {
    let Value::Object(map) = behavior else {
        return;
    };
    let mut items: Vec<Value> = map
        .get("FunctionAssociations")
        .and_then(|fa| fa.get("Items"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| {
                    item.get("EventType").and_then(Value::as_str) != Some(VIEWER_REQUEST)
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    items.push(association.clone());
    map.insert(
        "FunctionAssociations".to_string(),
        json!({"Quantity": items.len(), "Items": items}),
    );
}

fn behaviors_mut(root: &mut Map<String, Value>) -> impl Iterator<Item = &mut Value> {
    let mut default = None;
    let mut ordered = None;
    for (key, value) in root.iter_mut() {
        match key.as_str() {
            "DefaultCacheBehavior" => default = Some(value),
            "CacheBehaviors" => ordered = value.get_mut("Items").and_then(Value::as_array_mut),
            _ => {}
        }
    }
    default
        .into_iter()
        .chain(ordered.into_iter().flat_map(|items| items.iter_mut()))
}

fn ensure_fle_placeholder(behavior: &mut Value) {
    if let Value::Object(map) = behavior {
        map.entry("FieldLevelEncryptionId")
            .or_insert_with(|| json!(""));
    }
}

/// Desired distribution config: one managed behavior per protected path.
fn associate(
    config: &Value,
    spec: &AssociationSpec,
    retired: &[String],
    rules: &NormalizeRules,
) -> Value {
    let mut next = config.clone();
    let Value::Object(root) = &mut next else {
        return normalize(config, rules);
    };

    if let Some(domain) = &spec.origin_domain {
        if let Some(origins) = items_mut(root, "Origins") {
            let wanted = Some(spec.origin_id.as_str());
            let present = origins
                .iter()
                .any(|origin| origin.get("Id").and_then(Value::as_str) == wanted);
            if !present {
                origins.push(spec.origin(domain));
            }
        }
    }

    if let Some(behaviors) = items_mut(root, "CacheBehaviors") {
        behaviors.retain(|behavior| {
            pattern_of(behavior).is_none_or(|pattern| !retired.iter().any(|gone| gone == pattern))
        });
        let association = spec.viewer_request();
        for pattern in &spec.patterns {
            match behaviors
                .iter_mut()
                .find(|behavior| pattern_of(behavior) == Some(pattern.as_str()))
            {
                Some(existing) => set_viewer_request(existing, &association),
                None => behaviors.push(spec.new_behavior(pattern)),
            }
        }
    }

    behaviors_mut(root).for_each(ensure_fle_placeholder);
    normalize(&next, rules)
}

/// Config with every function association zeroed; unchanged when there are none.
fn dissociate(config: &Value, rules: &NormalizeRules) -> Value {
    let mut next = config.clone();
    let Value::Object(root) = &mut next else {
        return config.clone();
    };

    let mut changed = false;
    for behavior in behaviors_mut(root) {
        let Value::Object(map) = behavior else {
            continue;
        };
        let mut touched = false;
        for key in ASSOCIATION_KEYS {
            let live = map
                .get(key)
                .and_then(|fa| fa.get("Quantity"))
                .and_then(Value::as_u64)
                .is_some_and(|quantity| quantity > 0);
            if live {
                map.insert(key.to_string(), json!({"Quantity": 0, "Items": []}));
                touched = true;
            }
        }
        if touched {
            map.entry("FieldLevelEncryptionId")
                .or_insert_with(|| json!(""));
            changed = true;
        }
    }

    if changed {
        normalize(&next, rules)
    } else {
        config.clone()
    }
}

impl EdgeFunctionAssociationHandler {
    pub fn new(distributions: Arc<dyn RemoteObjects>) -> Self {
        Self {
            distributions,
            rules: NormalizeRules::distribution(),
        }
    }

    /// Wait for a written config to deploy within the budget.
    ///
    /// Running out of wait is only a warning.
    async fn await_propagation(
        &self,
        ctx: &InvocationContext,
        id: &str,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        info!(distribution = id, "Waiting for distribution to deploy");
        let deployed = wait_for_status(
            &ctx.budget,
            &ctx.config.propagation.capped_at(ctx.budget.headroom()),
            self.distributions.as_ref(),
            id,
            &[DEPLOYED],
            &[],
        )
        .await
        .map(|_| ());
        tolerate_timeout(deployed, "waiting for distribution deployment", warnings)
    }

    async fn apply(&self, ctx: &InvocationContext, retired: &[String]) -> Result<ResourceOutput> {
        let spec = AssociationSpec::from_properties(ctx.properties())?;
        info!(
            distribution = %spec.distribution_id,
            paths = spec.patterns.len(),
            retired = retired.len(),
            "Associating edge function"
        );

        let mutation = mutate_object(
            &ctx.budget,
            &ctx.config.conflict_retry,
            self.distributions.as_ref(),
            &spec.distribution_id,
            |config| Ok(associate(config, &spec, retired, &self.rules)),
        )
        .await?;

        let mut warnings = Vec::new();
        if mutation.was_written() {
            self.await_propagation(ctx, &spec.distribution_id, &mut warnings)
                .await?;
        } else {
            info!(distribution = %spec.distribution_id, "Distribution already configured");
        }

        Ok(ResourceOutput::new(spec.physical_id())
            .with("DistributionId", spec.distribution_id.as_str())
            .with("Status", "Updated")
            .with("ChangesApplied", mutation.was_written())
            .with_warnings(warnings))
    }
}

#[async_trait]
impl ResourceHandler for EdgeFunctionAssociationHandler {
    fn kind(&self) -> &str {
        "EdgeFunctionAssociation"
    }

    async fn create(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        self.apply(ctx, &[]).await
    }

    async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let current = path_patterns(ctx.properties());
        let retired: Vec<String> = ctx
            .event
            .old_properties
            .as_ref()
            .map(path_patterns)
            .unwrap_or_default()
            .into_iter()
            .filter(|pattern| !current.contains(pattern))
            .collect();
        self.apply(ctx, &retired).await
    }

    async fn delete(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        let Some(distribution_id) = ctx.properties().opt_str("DistributionId") else {
            info!("No DistributionId, nothing to detach");
            return Ok(ResourceOutput::new(id));
        };

        let mutation = mutate_object(
            &ctx.budget,
            &ctx.config.conflict_retry,
            self.distributions.as_ref(),
            distribution_id,
            |config| Ok(dissociate(config, &self.rules)),
        )
        .await?;

        let mut warnings = Vec::new();
        if mutation.was_written() {
            self.await_propagation(ctx, distribution_id, &mut warnings)
                .await?;
        }
        Ok(ResourceOutput::new(id).with_warnings(warnings))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use rekon_core::Verb;
    use rekon_reconciler::{InMemoryObjects, RemoteOp, RemoteStatus};

    use super::*;
    use crate::testing::{context, update_context};

    fn distribution() -> Value {
        json!({
            "Comment": "",
            "Origins": {
                "Quantity": 1,
                "Items": [{"Id": "bucket", "DomainName": "b.s3", "OriginPath": ""}],
            },
            "DefaultCacheBehavior": {
                "TargetOriginId": "bucket",
                "CachePolicyId": "cp",
                "ForwardedValues": {"QueryString": false},
                "FunctionAssociations": {"Quantity": 0, "Items": []}
            },
            "CacheBehaviors": {"Quantity": 0, "Items": []},
            "Logging": null
        })
    }

    fn props(paths: &str) -> Value {
        json!({
            "DistributionId": "dist-1",
            "ProtectedPaths": paths,
            "ViewerRequestFunctionArn": "arn:fn:guard",
            "NoCachePolicyId": "rp-1",
            "OriginDomainName": "d123.example.net"
        })
    }

    async fn seeded() -> Arc<InMemoryObjects> {
        let distributions = Arc::new(InMemoryObjects::with_ready_status("distributions", DEPLOYED));
        distributions
            .seed_with_id("dist-1", "site", distribution())
            .await;
        distributions
    }

    fn patterns(config: &Value) -> Vec<String> {
        config["CacheBehaviors"]["Items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|b| b["PathPattern"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_adds_behaviors_and_normalizes() {
        let distributions = seeded().await;
        let handler = EdgeFunctionAssociationHandler::new(distributions.clone());
        let ctx = context("EdgeFunctionAssociation", Verb::Create, props("/a/, /b/"), None);

        let output = handler.create(&ctx).await.unwrap();
        assert_eq!(output.physical_id, "edge-association-dist-1");
        assert_eq!(output.data["ChangesApplied"], true);

        let config = distributions.snapshot("dist-1").await.unwrap();
        assert_eq!(patterns(&config), vec!["/a/*", "/b/*"]);
        assert_eq!(config["CacheBehaviors"]["Quantity"], 2);
        assert_eq!(config["Origins"]["Quantity"], 2);
        assert_eq!(config["Comment"], "");
        assert!(config.get("Logging").is_none());
        assert!(config["DefaultCacheBehavior"].get("ForwardedValues").is_none());
        let behavior = &config["CacheBehaviors"]["Items"][0];
        assert_eq!(behavior["FunctionAssociations"]["Quantity"], 1);
        assert_eq!(behavior["ResponseHeadersPolicyId"], "rp-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_update_is_a_no_op() {
        let distributions = seeded().await;
        let handler = EdgeFunctionAssociationHandler::new(distributions.clone());
        let ctx = context("EdgeFunctionAssociation", Verb::Create, props("/a/"), None);
        handler.create(&ctx).await.unwrap();
        let writes = distributions.calls(RemoteOp::Write).await;

        let update = update_context(
            "EdgeFunctionAssociation",
            props("/a/"),
            props("/a/"),
            "edge-association-dist-1",
        );
        let output = handler.update(&update).await.unwrap();
        assert_eq!(output.data["ChangesApplied"], false);
        assert_eq!(distributions.calls(RemoteOp::Write).await, writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_drops_retired_paths() {
        let distributions = seeded().await;
        let handler = EdgeFunctionAssociationHandler::new(distributions.clone());
        let ctx = context("EdgeFunctionAssociation", Verb::Create, props("/a/,/b/"), None);
        handler.create(&ctx).await.unwrap();

        let update = update_context(
            "EdgeFunctionAssociation",
            props("/b/,/c/"),
            props("/a/,/b/"),
            "edge-association-dist-1",
        );
        handler.update(&update).await.unwrap();

        let config = distributions.snapshot("dist-1").await.unwrap();
        assert_eq!(patterns(&config), vec!["/b/*", "/c/*"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_timeout_is_a_warning() {
        let distributions = seeded().await;
        distributions
            .script_status("dist-1", vec![RemoteStatus::new("InProgress")])
            .await;
        let handler = EdgeFunctionAssociationHandler::new(distributions.clone());
        let ctx = context("EdgeFunctionAssociation", Verb::Create, props("/a/"), None);

        let output = handler.create(&ctx).await.unwrap();
        assert_eq!(output.warnings.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_zeroes_associations() {
        let distributions = seeded().await;
        let handler = EdgeFunctionAssociationHandler::new(distributions.clone());
        let ctx = context("EdgeFunctionAssociation", Verb::Create, props("/a/"), None);
        handler.create(&ctx).await.unwrap();

        let delete = context(
            "EdgeFunctionAssociation",
            Verb::Delete,
            props("/a/"),
            Some("edge-association-dist-1"),
        );
        handler.delete(&delete).await.unwrap();

        let config = distributions.snapshot("dist-1").await.unwrap();
        assert_eq!(
            config["CacheBehaviors"]["Items"][0]["FunctionAssociations"],
            json!({"Quantity": 0})
        );

        let writes = distributions.calls(RemoteOp::Write).await;
        handler.delete(&delete).await.unwrap();
        assert_eq!(distributions.calls(RemoteOp::Write).await, writes);
    }

    #[test]
    fn test_associate_is_idempotent() {
        let rules = NormalizeRules::distribution();
        let spec = AssociationSpec::from_properties(&Properties::new(
            props("/x/").as_object().cloned().unwrap(),
        ))
        .unwrap();
        let once = associate(&distribution(), &spec, &[], &rules);
        assert_eq!(associate(&once, &spec, &[], &rules), once);
    }
}
