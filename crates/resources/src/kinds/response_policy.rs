//! Response-headers policy that disables caching and sets security headers.

use std::sync::Arc;

use async_trait::async_trait;
use rekon_core::{Error, Properties, ResourceOutput, Result};
use rekon_reconciler::{RemoteObjects, mutate_object};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{create_object, read_existing, remove};
use crate::handler::{InvocationContext, ResourceHandler};

const NO_CACHE_HEADERS: [(&str, &str); 3] = [
    ("Cache-Control", "no-store, no-cache, must-revalidate, max-age=0"),
    ("Pragma", "no-cache"),
    ("Expires", "0"),
];
const HSTS_MAX_AGE_SECS: u64 = 31_536_000;

/// Handler for `ResponsePolicy`.
pub struct ResponsePolicyHandler {
    header_policies: Arc<dyn RemoteObjects>,
}

#[derive(Debug, Clone, PartialEq)]
struct PolicySpec {
    name: String,
    comment: String,
    content_security_policy: Option<String>,
}

impl PolicySpec {
    fn from_properties(props: &Properties) -> Result<Self> {
        let name = props.require_str("Name")?;
        if name.len() > 128 {
            return Err(Error::invalid_properties(format!(
                "Name must be at most 128 characters, got {}",
                name.len()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            comment: props
                .opt_str("Comment")
                .unwrap_or("No-cache headers for protected content")
                .to_string(),
            content_security_policy: props.opt_str("ContentSecurityPolicy").map(str::to_string),
        })
    }

    fn config(&self) -> Value {
        let headers: Vec<Value> = NO_CACHE_HEADERS
            .iter()
            .map(|(header, value)| json!({"Header": header, "Value": value, "Override": true}))
            .collect();

        let mut security = json!({
            "ContentTypeOptions": {"Override": true},
            "FrameOptions": {"FrameOption": "DENY", "Override": true},
            "ReferrerPolicy": {
                "ReferrerPolicy": "strict-origin-when-cross-origin",
                "Override": true,
            },
            "StrictTransportSecurity": {
                "AccessControlMaxAgeSec": HSTS_MAX_AGE_SECS,
                "IncludeSubdomains": true,
                "Preload": false,
                "Override": true,
            },
        });
        if let (Some(csp), Value::Object(map)) = (&self.content_security_policy, &mut security) {
            map.insert(
                "ContentSecurityPolicy".to_string(),
                json!({"ContentSecurityPolicy": csp, "Override": true}),
            );
        }

        json!({
            "Name": self.name,
            "Comment": self.comment,
            "CustomHeadersConfig": {"Quantity": headers.len(), "Items": headers},
            "SecurityHeadersConfig": security,
            "ServerTimingHeadersConfig": {"Enabled": false, "SamplingRate": 0.0},
        })
    }
}

impl ResponsePolicyHandler {
    pub fn new(header_policies: Arc<dyn RemoteObjects>) -> Self {
        Self { header_policies }
    }

    async fn provision(
        &self,
        ctx: &InvocationContext,
        spec: &PolicySpec,
    ) -> Result<ResourceOutput> {
        let remote = self.header_policies.as_ref();
        let policy = create_object(ctx, remote, &spec.name, "", spec.config()).await?;
        Ok(ResourceOutput::new(&policy.id).with("ResponseHeadersPolicyId", policy.id.as_str()))
    }
}

#[async_trait]
impl ResourceHandler for ResponsePolicyHandler {
    fn kind(&self) -> &str {
        "ResponsePolicy"
    }

    async fn create(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let spec = PolicySpec::from_properties(ctx.properties())?;
        info!(name = %spec.name, "Creating response headers policy");
        self.provision(ctx, &spec).await
    }

    async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        let spec = PolicySpec::from_properties(ctx.properties())?;

        if read_existing(ctx, self.header_policies.as_ref(), id)
            .await?
            .is_none()
        {
            warn!(id, "Response headers policy not found, recreating");
            return self.provision(ctx, &spec).await;
        }

        let desired = spec.config();
        let mutation = mutate_object(
            &ctx.budget,
            &ctx.config.conflict_retry,
            self.header_policies.as_ref(),
            id,
            |_| Ok(desired.clone()),
        )
        .await?;
        info!(id, written = mutation.was_written(), "Response headers policy reconciled");
        Ok(ResourceOutput::new(id).with("ResponseHeadersPolicyId", id))
    }

    async fn delete(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        remove(ctx, self.header_policies.as_ref(), id).await?;
        Ok(ResourceOutput::new(id))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use rekon_core::{RemoteError, Verb};
    use rekon_reconciler::{InMemoryObjects, RemoteOp};

    use super::*;
    use crate::testing::{context, update_context};

    fn props(csp: &str) -> Value {
        json!({"Name": "no-cache", "ContentSecurityPolicy": csp})
    }

    #[test]
    fn test_config_shape() {
        let spec = PolicySpec::from_properties(&Properties::new(
            props("").as_object().cloned().unwrap(),
        ))
        .unwrap();
        let config = spec.config();
        assert_eq!(config["CustomHeadersConfig"]["Quantity"], 3);
        assert_eq!(
            config["CustomHeadersConfig"]["Items"][0]["Value"],
            "no-store, no-cache, must-revalidate, max-age=0"
        );
        assert_eq!(config["SecurityHeadersConfig"]["FrameOptions"]["FrameOption"], "DENY");
        assert!(config["SecurityHeadersConfig"].get("ContentSecurityPolicy").is_none());
    }

    #[tokio::test]
    async fn test_create_then_update_with_csp() {
        let policies = Arc::new(InMemoryObjects::new("header-policies"));
        let handler = ResponsePolicyHandler::new(policies.clone());

        let ctx = context("ResponsePolicy", Verb::Create, props(""), None);
        let id = handler.create(&ctx).await.unwrap().physical_id;

        let same = update_context("ResponsePolicy", props(""), props(""), &id);
        handler.update(&same).await.unwrap();
        assert_eq!(policies.calls(RemoteOp::Write).await, 0);

        let csp = update_context("ResponsePolicy", props("default-src 'self'"), props(""), &id);
        let output = handler.update(&csp).await.unwrap();
        assert_eq!(output.data["ResponseHeadersPolicyId"], id.as_str());
        let stored = policies.snapshot(&id).await.unwrap();
        assert_eq!(
            stored["SecurityHeadersConfig"]["ContentSecurityPolicy"]["ContentSecurityPolicy"],
            "default-src 'self'"
        );
    }

    #[tokio::test]
    async fn test_update_recreates_missing_policy() {
        let policies = Arc::new(InMemoryObjects::new("header-policies"));
        let handler = ResponsePolicyHandler::new(policies.clone());

        let ctx = update_context("ResponsePolicy", props(""), props(""), "header-policies-gone");
        let output = handler.update(&ctx).await.unwrap();
        assert_ne!(output.physical_id, "header-policies-gone");
        assert_eq!(policies.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_waits_for_detach() {
        let policies = Arc::new(InMemoryObjects::new("header-policies"));
        let handler = ResponsePolicyHandler::new(policies.clone());
        let ctx = context("ResponsePolicy", Verb::Create, props(""), None);
        let id = handler.create(&ctx).await.unwrap().physical_id;
        policies
            .fail_next(RemoteOp::Delete, RemoteError::in_use("attached to a distribution"))
            .await;

        let delete = context("ResponsePolicy", Verb::Delete, props(""), Some(&id));
        handler.delete(&delete).await.unwrap();
        assert_eq!(policies.calls(RemoteOp::Delete).await, 2);
        assert!(policies.is_empty().await);
    }

    #[test]
    fn test_long_name_rejected() {
        let props = json!({"Name": "x".repeat(129)});
        let err = PolicySpec::from_properties(&Properties::new(props.as_object().cloned().unwrap()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidProperties { .. }));
    }
}
