//! Web firewall with an optional IP allow-list.
//!
//! When any CIDR is allow-listed an IP set is created and the ACL blocks by
//! default; otherwise the ACL allows by default and carries no rules.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use rekon_core::{Error, Properties, ResourceOutput, Result, ResultExt};
use rekon_reconciler::{RemoteObjects, mutate_object};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{create_object, find_by_name, read_existing, remove, string_array};
use crate::handler::{InvocationContext, ResourceHandler};

const IP_SET_ID: &str = "IpSetId";
const ALLOW_RULE: &str = "IPAllowlistRule";

static CIDR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})$").ok());

/// Whether `cidr` is a well-formed IPv4 CIDR block.
pub fn is_valid_cidr(cidr: &str) -> bool {
    let Some(captures) = CIDR.as_ref().and_then(|re| re.captures(cidr)) else {
        return false;
    };
    let octets_ok = (1..=4).all(|i| {
        captures
            .get(i)
            .and_then(|m| m.as_str().parse::<u8>().ok())
            .is_some()
    });
    let prefix_ok = captures
        .get(5)
        .and_then(|m| m.as_str().parse::<u8>().ok())
        .is_some_and(|prefix| prefix <= 32);
    octets_ok && prefix_ok
}

/// Handler for `Firewall`.
pub struct FirewallHandler {
    ip_sets: Arc<dyn RemoteObjects>,
    acls: Arc<dyn RemoteObjects>,
}

#[derive(Debug, Clone, PartialEq)]
struct FirewallSpec {
    name: String,
    scope: String,
    description: String,
    allowed: Vec<String>,
}

impl FirewallSpec {
    /// Parse properties; invalid CIDRs are dropped into `warnings`.
    fn from_properties(props: &Properties, warnings: &mut Vec<String>) -> Result<Self> {
        let name = props.require_str("Name")?.to_string();
        let requested = props.string_list("AllowedIpCidrs");
        let (allowed, invalid): (Vec<String>, Vec<String>) =
            requested.iter().cloned().partition(|cidr| is_valid_cidr(cidr));

        if !invalid.is_empty() {
            warn!(invalid = ?invalid, "Skipping invalid CIDR entries");
            warnings.push(format!("skipped invalid CIDR entries: {}", invalid.join(", ")));
        }
        if !requested.is_empty() && allowed.is_empty() {
            return Err(Error::invalid_properties(
                "AllowedIpCidrs contains no valid CIDR block",
            ));
        }

        Ok(Self {
            description: props
                .opt_str("Description")
                .map_or_else(|| format!("Firewall for {name}"), str::to_string),
            scope: props.opt_str("Scope").unwrap_or("REGIONAL").to_string(),
            allowed,
            name,
        })
    }

    fn ip_set_name(&self) -> String {
        format!("{}-ipset", self.name)
    }

    fn ip_set_payload(&self) -> Value {
        json!({
            "Name": self.ip_set_name(),
            "Scope": self.scope,
            "IPAddressVersion": "IPV4",
            "Addresses": string_array(&self.allowed),
        })
    }

    /// Rules and default action for the ACL, given the IP set to reference.
    fn apply_to_acl(&self, current: &Value, ip_set: Option<&str>) -> Value {
        let mut next = current.clone();
        let rules = match ip_set {
            Some(id) => json!([{
                "Name": ALLOW_RULE,
                "Priority": 1,
                "Statement": {"IPSetReferenceStatement": {"Id": id}},
                "Action": {"Allow": {}},
                "VisibilityConfig": {
                    "SampledRequestsEnabled": true,
                    "CloudWatchMetricsEnabled": true,
                    "MetricName": format!("{}-IPAllowlist", self.name),
                },
            }]),
            None => json!([]),
        };
        let default_action = if ip_set.is_some() {
            json!({"Block": {}})
        } else {
            json!({"Allow": {}})
        };
        if let Value::Object(map) = &mut next {
            map.insert("Name".to_string(), json!(self.name));
            map.insert("Scope".to_string(), json!(self.scope));
            map.insert("Description".to_string(), json!(self.description));
            map.insert("DefaultAction".to_string(), default_action);
            map.insert("Rules".to_string(), rules);
            match ip_set {
                Some(id) => map.insert(IP_SET_ID.to_string(), json!(id)),
                None => map.remove(IP_SET_ID),
            };
        }
        next
    }
}

fn ip_set_of(acl: &Value) -> Option<String> {
    acl.get(IP_SET_ID).and_then(Value::as_str).map(str::to_string)
}

impl FirewallHandler {
    pub fn new(ip_sets: Arc<dyn RemoteObjects>, acls: Arc<dyn RemoteObjects>) -> Self {
        Self { ip_sets, acls }
    }

    /// Create the IP set, or converge an existing one onto the allow-list.
    async fn ensure_ip_set(
        &self,
        ctx: &InvocationContext,
        spec: &FirewallSpec,
        known: Option<String>,
    ) -> Result<String> {
        let existing = match known {
            Some(id) => read_existing(ctx, self.ip_sets.as_ref(), &id)
                .await?
                .map(|object| object.id),
            None => find_by_name(ctx, self.ip_sets.as_ref(), &spec.ip_set_name())
                .await?
                .map(|summary| summary.id),
        };

        let Some(id) = existing else {
            let created = create_object(
                ctx,
                self.ip_sets.as_ref(),
                &spec.ip_set_name(),
                "",
                spec.ip_set_payload(),
            )
            .await?;
            return Ok(created.id);
        };

        let addresses = string_array(&spec.allowed);
        mutate_object(
            &ctx.budget,
            &ctx.config.conflict_retry,
            self.ip_sets.as_ref(),
            &id,
            |payload| {
                let mut next = payload.clone();
                if let Value::Object(map) = &mut next {
                    map.insert("Addresses".to_string(), addresses.clone());
                }
                Ok(next)
            },
        )
        .await?;
        Ok(id)
    }

    fn output(
        ctx: &InvocationContext,
        id: &str,
        spec: &FirewallSpec,
        ip_set: Option<&str>,
    ) -> ResourceOutput {
        let scope = spec.scope.to_lowercase();
        let mut output = ResourceOutput::new(id)
            .with("WebAclId", id)
            .with("WebAclArn", ctx.arn("wafv2", &format!("{scope}/webacl/{}/{id}", spec.name)))
            .with("WebAclName", spec.name.as_str())
            .with("Scope", spec.scope.as_str());
        if let Some(ip_set) = ip_set {
            output = output.with(IP_SET_ID, ip_set).with(
                "IpSetArn",
                ctx.arn("wafv2", &format!("{scope}/ipset/{}/{ip_set}", spec.ip_set_name())),
            );
        }
        output
    }
}

#[async_trait]
impl ResourceHandler for FirewallHandler {
    fn kind(&self) -> &str {
        "Firewall"
    }

    async fn create(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let mut warnings = Vec::new();
        let spec = FirewallSpec::from_properties(ctx.properties(), &mut warnings)?;
        info!(name = %spec.name, allowed = spec.allowed.len(), "Creating firewall");

        let ip_set = if spec.allowed.is_empty() {
            None
        } else {
            Some(self.ensure_ip_set(ctx, &spec, None).await?)
        };

        let payload = spec.apply_to_acl(&json!({}), ip_set.as_deref());
        let acl = create_object(ctx, self.acls.as_ref(), &spec.name, "", payload).await?;
        Ok(Self::output(ctx, &acl.id, &spec, ip_set.as_deref()).with_warnings(warnings))
    }

    async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        let mut warnings = Vec::new();
        let spec = FirewallSpec::from_properties(ctx.properties(), &mut warnings)?;

        let Some(current) = read_existing(ctx, self.acls.as_ref(), id).await? else {
            warn!(id, "Firewall not found, recreating");
            return self.create(ctx).await;
        };
        let previous_ip_set = ip_set_of(&current.payload);

        let ip_set = if spec.allowed.is_empty() {
            None
        } else {
            Some(self.ensure_ip_set(ctx, &spec, previous_ip_set.clone()).await?)
        };

        let reference = ip_set.clone();
        mutate_object(
            &ctx.budget,
            &ctx.config.conflict_retry,
            self.acls.as_ref(),
            id,
            |payload| Ok(spec.apply_to_acl(payload, reference.as_deref())),
        )
        .await?;

        if let Some(stale) = previous_ip_set.filter(|_| ip_set.is_none()) {
            let _ = remove(ctx, self.ip_sets.as_ref(), &stale)
                .await
                .or_warn("removing unused IP set", &mut warnings);
        }

        Ok(Self::output(ctx, id, &spec, ip_set.as_deref()).with_warnings(warnings))
    }

    async fn delete(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        let Some(current) = read_existing(ctx, self.acls.as_ref(), id).await? else {
            info!(id, "Firewall not found, nothing to delete");
            return Ok(ResourceOutput::new(id).with("Status", "AlreadyDeleted"));
        };

        remove(ctx, self.acls.as_ref(), id).await?;
        if let Some(ip_set) = ip_set_of(&current.payload) {
            remove(ctx, self.ip_sets.as_ref(), &ip_set).await?;
        }
        info!(id, "Firewall deleted");
        Ok(ResourceOutput::new(id))
    }
}
