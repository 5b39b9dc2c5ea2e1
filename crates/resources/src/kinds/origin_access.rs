//! Origin access control letting the edge sign its requests to a storage origin.

use std::sync::Arc;

use async_trait::async_trait;
use rekon_core::{Error, Properties, ResourceOutput, Result};
use rekon_reconciler::{RemoteObjects, mutate_object};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{create_object, read_existing, remove};
use crate::handler::{InvocationContext, ResourceHandler};

const ORIGIN_TYPES: [&str; 4] = ["s3", "mediastore", "lambda", "mediapackagev2"];
const SIGNING_BEHAVIORS: [&str; 3] = ["always", "never", "no-override"];
const OUTPUT_KEY: &str = "OriginAccessControlId";

/// Handler for `OriginAccessControl`.
pub struct OriginAccessControlHandler {
    access_controls: Arc<dyn RemoteObjects>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AccessSpec {
    name: String,
    description: String,
    origin_type: String,
    signing_behavior: String,
}

fn one_of(props: &Properties, key: &str, allowed: &[&str], default: &str) -> Result<String> {
    let value = props.opt_str(key).unwrap_or(default);
    if allowed.contains(&value) {
        Ok(value.to_string())
    } else {
        Err(Error::invalid_properties(format!(
            "{key} must be one of {}, got '{value}'",
            allowed.join(", ")
        )))
    }
}

impl AccessSpec {
    fn from_properties(props: &Properties) -> Result<Self> {
        let name = props.require_str("Name")?;
        if name.len() > 64 {
            return Err(Error::invalid_properties(format!(
                "Name must be at most 64 characters, got {}",
                name.len()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            description: props
                .opt_str("Description")
                .unwrap_or("Origin access control for storage origin access")
                .to_string(),
            origin_type: one_of(props, "OriginType", &ORIGIN_TYPES, "s3")?,
            signing_behavior: one_of(props, "SigningBehavior", &SIGNING_BEHAVIORS, "always")?,
        })
    }

    fn config(&self) -> Value {
        json!({
            "Name": self.name,
            "Description": self.description,
            "OriginAccessControlOriginType": self.origin_type,
            "SigningBehavior": self.signing_behavior,
            "SigningProtocol": "sigv4",
        })
    }
}

impl OriginAccessControlHandler {
    pub fn new(access_controls: Arc<dyn RemoteObjects>) -> Self {
        Self { access_controls }
    }

    async fn provision(
        &self,
        ctx: &InvocationContext,
        spec: &AccessSpec,
    ) -> Result<ResourceOutput> {
        let remote = self.access_controls.as_ref();
        let control = create_object(ctx, remote, &spec.name, "", spec.config()).await?;
        Ok(ResourceOutput::new(&control.id).with(OUTPUT_KEY, control.id.as_str()))
    }
}

#[async_trait]
impl ResourceHandler for OriginAccessControlHandler {
    fn kind(&self) -> &str {
        "OriginAccessControl"
    }

    async fn create(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let spec = AccessSpec::from_properties(ctx.properties())?;
        info!(name = %spec.name, origin_type = %spec.origin_type, "Creating origin access control");
        self.provision(ctx, &spec).await
    }

    async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        let spec = AccessSpec::from_properties(ctx.properties())?;

        if read_existing(ctx, self.access_controls.as_ref(), id)
            .await?
            .is_none()
        {
            warn!(id, "Origin access control not found, recreating");
            return self.provision(ctx, &spec).await;
        }

        let desired = spec.config();
        let mutation = mutate_object(
            &ctx.budget,
            &ctx.config.conflict_retry,
            self.access_controls.as_ref(),
            id,
            |_| Ok(desired.clone()),
        )
        .await?;
        info!(id, written = mutation.was_written(), "Origin access control reconciled");
        Ok(ResourceOutput::new(id).with(OUTPUT_KEY, id))
    }

    async fn delete(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        remove(ctx, self.access_controls.as_ref(), id).await?;
        Ok(ResourceOutput::new(id))
    }
}
