//! Scaling group backed by a launch template.
//!
//! The template is created first and referenced from the group payload as
//! `LaunchTemplateId`, which is how delete finds it again. Step scaling
//! policies are optional and always best-effort.

use std::sync::Arc;

use async_trait::async_trait;
use rekon_core::{Error, Properties, ResourceOutput, Result, ResultExt};
use rekon_reconciler::{RemoteObjects, mutate_object, wait_for_status, wait_until};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::{
    create_object, find_by_name, read_existing, remove, string_array, tolerate_timeout,
};
use crate::handler::{InvocationContext, ResourceHandler};

const IN_SERVICE: &str = "InService";
const FAILED: &str = "Failed";
const TEMPLATE_ID: &str = "LaunchTemplateId";
const INSTANCE_COUNT: &str = "InstanceCount";
const MIXED_INSTANCES: &str = "MixedInstancesPolicy";
const POLICY_COOLDOWN_SECS: u32 = 300;
const MAX_SPOT_POOLS: usize = 4;

/// Handler for `ScalingGroup`.
pub struct ScalingGroupHandler {
    templates: Arc<dyn RemoteObjects>,
    groups: Arc<dyn RemoteObjects>,
    policies: Arc<dyn RemoteObjects>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    const BOTH: [Self; 2] = [Self::Up, Self::Down];

    const fn suffix(self) -> &'static str {
        match self {
            Self::Up => "scale-up",
            Self::Down => "scale-down",
        }
    }

    fn step(self) -> Value {
        match self {
            Self::Up => json!({"MetricIntervalLowerBound": 0, "ScalingAdjustment": 1}),
            Self::Down => json!({"MetricIntervalUpperBound": 0, "ScalingAdjustment": -1}),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct GroupSpec {
    group_name: String,
    template_name: String,
    subnet_ids: Vec<String>,
    min_size: u32,
    max_size: u32,
    desired: u32,
    target_groups: Vec<String>,
    instance_type: Option<String>,
    image_id: Option<String>,
    instance_types: Vec<String>,
    on_demand_percentage: u32,
    spot_max_price: Option<String>,
    scaling_policies: bool,
    tags: Map<String, Value>,
}

impl GroupSpec {
    fn from_properties(props: &Properties) -> Result<Self> {
        props.require_fields(&["GroupName", "TemplateName"])?;
        let spec = Self {
            group_name: props.require_str("GroupName")?.to_string(),
            template_name: props.require_str("TemplateName")?.to_string(),
            subnet_ids: props.require_list("SubnetIds")?,
            min_size: props.require_u32("MinSize")?,
            max_size: props.require_u32("MaxSize")?,
            desired: props.require_u32("DesiredCapacity")?,
            target_groups: props.string_list("TargetGroupArns"),
            instance_type: props.opt_str("InstanceType").map(str::to_string),
            image_id: props.opt_str("ImageId").map(str::to_string),
            instance_types: props.string_list("InstanceTypes"),
            on_demand_percentage: props.opt_u32("OnDemandPercentage")?.unwrap_or(100),
            spot_max_price: props.opt_str("SpotMaxPrice").map(str::to_string),
            scaling_policies: props.flag("CreateScalingPolicies"),
            tags: props.tags("Tags"),
        };
        if spec.min_size > spec.desired || spec.desired > spec.max_size {
            return Err(Error::invalid_properties(format!(
                "sizes must satisfy MinSize <= DesiredCapacity <= MaxSize (got {} <= {} <= {})",
                spec.min_size, spec.desired, spec.max_size
            )));
        }
        if spec.on_demand_percentage > 100 {
            return Err(Error::invalid_properties(format!(
                "OnDemandPercentage must be at most 100 (got {})",
                spec.on_demand_percentage
            )));
        }
        Ok(spec)
    }

    fn template_payload(&self) -> Value {
        json!({
            "TemplateName": self.template_name,
            "InstanceType": self.instance_type,
            "ImageId": self.image_id,
            "Tags": self.tags,
        })
    }

    /// Overlay the fields this spec sets onto a stored template.
    fn apply_to_template(&self, current: &Value) -> Value {
        let mut next = current.clone();
        if let (Value::Object(map), Value::Object(desired)) = (&mut next, self.template_payload()) {
            map.extend(desired.into_iter().filter(|(_, value)| !value.is_null()));
        }
        next
    }

    fn mixed_instances(&self, template_id: &str) -> Value {
        let overrides: Vec<Value> = self
            .instance_types
            .iter()
            .map(|instance_type| json!({"InstanceType": instance_type}))
            .collect();
        let mut distribution = json!({
            "OnDemandPercentageAboveBaseCapacity": self.on_demand_percentage,
            "SpotAllocationStrategy": "diversified",
        });
        if self.on_demand_percentage < 100 {
            if let Value::Object(map) = &mut distribution {
                let pools = self.instance_types.len().min(MAX_SPOT_POOLS);
                map.insert("SpotInstancePools".to_string(), json!(pools));
                if let Some(price) = &self.spot_max_price {
                    map.insert("SpotMaxPrice".to_string(), json!(price));
                }
            }
        }
        json!({
            "LaunchTemplate": {
                "LaunchTemplateSpecification": {
                    "LaunchTemplateId": template_id,
                    "Version": "$Latest",
                },
                "Overrides": overrides,
            },
            "InstancesDistribution": distribution,
        })
    }

    /// Apply the desired sizing onto a group payload, keeping everything else.
    fn apply_to_group(&self, current: &Value) -> Value {
        let mut next = current.clone();
        let template_id = template_of(current);
        if let Value::Object(map) = &mut next {
            map.insert("GroupName".to_string(), json!(self.group_name));
            map.insert("MinSize".to_string(), json!(self.min_size));
            map.insert("MaxSize".to_string(), json!(self.max_size));
            map.insert("DesiredCapacity".to_string(), json!(self.desired));
            map.insert("SubnetIds".to_string(), string_array(&self.subnet_ids));
            map.insert("TargetGroupArns".to_string(), string_array(&self.target_groups));
            match template_id {
                Some(id) if !self.instance_types.is_empty() => {
                    map.insert(MIXED_INSTANCES.to_string(), self.mixed_instances(&id));
                }
                _ => {
                    map.remove(MIXED_INSTANCES);
                }
            }
        }
        next
    }

    fn group_payload(&self, template_id: &str) -> Value {
        self.apply_to_group(&json!({ "LaunchTemplateId": template_id }))
    }

    fn policy_name(&self, direction: Direction) -> String {
        format!("{}-{}", self.group_name, direction.suffix())
    }

    fn policy_payload(&self, direction: Direction) -> Value {
        json!({
            "PolicyName": self.policy_name(direction),
            "AutoScalingGroupName": self.group_name,
            "PolicyType": "StepScaling",
            "AdjustmentType": "ChangeInCapacity",
            "Cooldown": POLICY_COOLDOWN_SECS,
            "StepAdjustments": [direction.step()],
        })
    }
}

fn template_of(group: &Value) -> Option<String> {
    group
        .get(TEMPLATE_ID)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn instance_count(group: &Value) -> u64 {
    group.get(INSTANCE_COUNT).and_then(Value::as_u64).unwrap_or(0)
}

impl ScalingGroupHandler {
    pub fn new(
        templates: Arc<dyn RemoteObjects>,
        groups: Arc<dyn RemoteObjects>,
        policies: Arc<dyn RemoteObjects>,
    ) -> Self {
        Self {
            templates,
            groups,
            policies,
        }
    }

    async fn wait_in_service(&self, ctx: &InvocationContext, id: &str) -> Result<()> {
        wait_for_status(
            &ctx.budget,
            &ctx.config.convergence,
            self.groups.as_ref(),
            id,
            &[IN_SERVICE],
            &[FAILED],
        )
        .await
        .map(|_| ())
    }

    async fn provision(
        &self,
        ctx: &InvocationContext,
        spec: &GroupSpec,
        created_template: &mut Option<String>,
        created_group: &mut Option<String>,
    ) -> Result<ResourceOutput> {
        let template = create_object(
            ctx,
            self.templates.as_ref(),
            &spec.template_name,
            "",
            spec.template_payload(),
        )
        .await?;
        *created_template = Some(template.id.clone());

        let group = create_object(
            ctx,
            self.groups.as_ref(),
            &spec.group_name,
            "",
            spec.group_payload(&template.id),
        )
        .await?;
        *created_group = Some(group.id.clone());

        self.wait_in_service(ctx, &group.id).await?;

        let mut warnings = Vec::new();
        let policy_arns = self.ensure_policies(ctx, spec, &mut warnings).await;
        let output = Self::output(ctx, &group.id, spec, &template.id, &policy_arns);
        Ok(output.with_warnings(warnings))
    }

    /// Create whichever step policies are missing; failures become warnings.
    async fn ensure_policies(
        &self,
        ctx: &InvocationContext,
        spec: &GroupSpec,
        warnings: &mut Vec<String>,
    ) -> Vec<String> {
        if !spec.scaling_policies {
            return Vec::new();
        }
        let mut arns = Vec::new();
        for direction in Direction::BOTH {
            let name = spec.policy_name(direction);
            let ensured = self.ensure_policy(ctx, spec, direction, &name).await;
            let context = format!("creating scaling policy {name}");
            if ensured.or_warn(&context, warnings).is_some() {
                arns.push(ctx.arn(
                    "autoscaling",
                    &format!("scalingPolicy:{}:policyName/{name}", spec.group_name),
                ));
            }
        }
        arns
    }

    async fn ensure_policy(
        &self,
        ctx: &InvocationContext,
        spec: &GroupSpec,
        direction: Direction,
        name: &str,
    ) -> Result<()> {
        if find_by_name(ctx, self.policies.as_ref(), name).await?.is_some() {
            return Ok(());
        }
        create_object(
            ctx,
            self.policies.as_ref(),
            name,
            direction.suffix(),
            spec.policy_payload(direction),
        )
        .await?;
        info!(policy = name, "Scaling policy created");
        Ok(())
    }

    /// Best-effort removal of both step policies.
    async fn remove_policies(
        &self,
        ctx: &InvocationContext,
        spec: &GroupSpec,
        warnings: &mut Vec<String>,
    ) {
        for direction in Direction::BOTH {
            let name = spec.policy_name(direction);
            let removed = async {
                if let Some(summary) = find_by_name(ctx, self.policies.as_ref(), &name).await? {
                    remove(ctx, self.policies.as_ref(), &summary.id).await?;
                }
                Ok::<_, Error>(())
            }
            .await;
            let _ = removed.or_warn(&format!("deleting scaling policy {name}"), warnings);
        }
    }

    /// Best-effort removal of whatever a failed create left behind.
    async fn cleanup(
        &self,
        ctx: &InvocationContext,
        template: Option<String>,
        group: Option<String>,
    ) {
        warn!(?template, ?group, "Cleaning up after failed create");
        if let Some(group) = group {
            let _ = remove(ctx, self.groups.as_ref(), &group)
                .await
                .into_option_logged();
        }
        if let Some(template) = template {
            let _ = remove(ctx, self.templates.as_ref(), &template)
                .await
                .into_option_logged();
        }
    }

    async fn scale_to_zero(&self, ctx: &InvocationContext, id: &str) -> Result<()> {
        mutate_object(
            &ctx.budget,
            &ctx.config.conflict_retry,
            self.groups.as_ref(),
            id,
            |payload| {
                let mut next = payload.clone();
                if let Value::Object(map) = &mut next {
                    map.insert("MinSize".to_string(), json!(0));
                    map.insert("DesiredCapacity".to_string(), json!(0));
                }
                Ok(next)
            },
        )
        .await?;

        // Leave one poll interval for the removals that follow the drain.
        let limit = ctx
            .budget
            .headroom()
            .saturating_sub(ctx.config.convergence.interval());
        let policy = ctx.config.convergence.capped_at(limit);
        let groups = self.groups.as_ref();
        wait_until(
            &ctx.budget,
            &format!("scale-down of group '{id}'"),
            &policy,
            || async move {
                let object = groups.read(id).await.map_err(Error::from)?;
                Ok::<_, Error>(instance_count(&object.payload))
            },
            |count| *count == 0,
            |_| None,
        )
        .await
        .map(|_| ())
    }

    fn output(
        ctx: &InvocationContext,
        id: &str,
        spec: &GroupSpec,
        template_id: &str,
        policy_arns: &[String],
    ) -> ResourceOutput {
        let output = ResourceOutput::new(id)
            .with("GroupName", spec.group_name.as_str())
            .with(
                "GroupArn",
                ctx.arn("autoscaling", &format!("autoScalingGroupName/{}", spec.group_name)),
            )
            .with(TEMPLATE_ID, template_id)
            .with("TemplateName", spec.template_name.as_str());
        if policy_arns.is_empty() {
            output
        } else {
            output.with("ScalingPolicyArns", policy_arns.join(","))
        }
    }
}

#[async_trait]
impl ResourceHandler for ScalingGroupHandler {
    fn kind(&self) -> &str {
        "ScalingGroup"
    }

    async fn create(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let spec = GroupSpec::from_properties(ctx.properties())?;
        info!(group = %spec.group_name, template = %spec.template_name, "Creating scaling group");

        let (mut template, mut group) = (None, None);
        match self.provision(ctx, &spec, &mut template, &mut group).await {
            Ok(output) => Ok(output),
            Err(err) => {
                self.cleanup(ctx, template, group).await;
                Err(err)
            }
        }
    }

    async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        let spec = GroupSpec::from_properties(ctx.properties())?;

        let Some(current) = read_existing(ctx, self.groups.as_ref(), id).await? else {
            warn!(id, "Scaling group not found, recreating");
            return self.create(ctx).await;
        };

        let sized = mutate_object(
            &ctx.budget,
            &ctx.config.conflict_retry,
            self.groups.as_ref(),
            id,
            |payload| Ok(spec.apply_to_group(payload)),
        )
        .await;
        let mutation = match sized {
            Err(err) if err.is_not_found() => {
                warn!(id, "Scaling group vanished during update, recreating");
                return self.create(ctx).await;
            }
            other => other?,
        };

        let mut warnings = Vec::new();
        let template_id =
            template_of(mutation.payload()).or_else(|| template_of(&current.payload));
        if let Some(template_id) = &template_id {
            let _ = mutate_object(
                &ctx.budget,
                &ctx.config.conflict_retry,
                self.templates.as_ref(),
                template_id,
                |payload| Ok(spec.apply_to_template(payload)),
            )
            .await
            .or_warn("updating launch template", &mut warnings);
        }

        self.wait_in_service(ctx, id).await?;
        let policy_arns = self.ensure_policies(ctx, &spec, &mut warnings).await;
        let template_id = template_id.as_deref().unwrap_or_default();
        Ok(Self::output(ctx, id, &spec, template_id, &policy_arns).with_warnings(warnings))
    }

    async fn delete(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        let Some(current) = read_existing(ctx, self.groups.as_ref(), id).await? else {
            info!(id, "Scaling group not found, nothing to delete");
            return Ok(ResourceOutput::new(id).with("Status", "AlreadyDeleted"));
        };

        let mut warnings = Vec::new();
        if let Ok(spec) = GroupSpec::from_properties(ctx.properties()) {
            self.remove_policies(ctx, &spec, &mut warnings).await;
        }

        let drained = self.scale_to_zero(ctx, id).await;
        tolerate_timeout(drained, "waiting for instances to terminate", &mut warnings)?;

        remove(ctx, self.groups.as_ref(), id).await?;
        if let Some(template_id) = template_of(&current.payload) {
            remove(ctx, self.templates.as_ref(), &template_id).await?;
        }
        info!(id, "Scaling group deleted");
        Ok(ResourceOutput::new(id).with_warnings(warnings))
    }
}
