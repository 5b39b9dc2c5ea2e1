//! Copies an identity client's secret into a secret store entry.
//!
//! The secret value never appears in logs or callback data.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rekon_core::{Error, Properties, ResourceOutput, Result, ResultExt};
use rekon_reconciler::{RemoteObjects, mutate_object};
use serde_json::{Value, json};
use tracing::info;

use super::{create_object, find_by_name};
use crate::handler::{InvocationContext, ResourceHandler};

const DELETED: &str = "deleted";

/// Handler for `ClientSecret`.
pub struct ClientSecretHandler {
    identity_clients: Arc<dyn RemoteObjects>,
    secrets: Arc<dyn RemoteObjects>,
}

#[derive(Debug, Clone, PartialEq)]
struct SecretSpec {
    pool_id: String,
    client_id: String,
    secret_name: String,
    description: String,
    stack_name: String,
}

impl SecretSpec {
    fn from_properties(props: &Properties) -> Result<Self> {
        props.require_fields(&["UserPoolId", "ClientId", "SecretName"])?;
        Ok(Self {
            pool_id: props.require_str("UserPoolId")?.to_string(),
            client_id: props.require_str("ClientId")?.to_string(),
            secret_name: props.require_str("SecretName")?.to_string(),
            description: props
                .opt_str("SecretDescription")
                .unwrap_or("Identity client secret")
                .to_string(),
            stack_name: props.opt_str("StackName").unwrap_or("unknown").to_string(),
        })
    }

    fn physical_id(&self) -> String {
        format!("client-secret-{}-{}", self.pool_id, self.client_id)
    }

    fn secret_payload(&self, secret: &str) -> Value {
        json!({
            "Description": self.description,
            "SecretString": {
                "client_id": self.client_id,
                "client_secret": secret,
                "user_pool_id": self.pool_id,
                "stack_name": self.stack_name,
            },
        })
    }
}

/// Mark a stored secret as logically deleted. Already-marked secrets are left alone.
fn mark_deleted(payload: &Value, deleted_at: &str) -> Value {
    let already = payload
        .pointer("/SecretString/status")
        .and_then(Value::as_str)
        == Some(DELETED);
    if already {
        return payload.clone();
    }

    let mut next = payload.clone();
    if let Some(secret) = next.get_mut("SecretString").and_then(Value::as_object_mut) {
        secret.insert("status".to_string(), json!(DELETED));
        secret.insert("deleted_at".to_string(), json!(deleted_at));
    }
    if let Value::Object(map) = &mut next {
        let description = map
            .get("Description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        map.insert("Description".to_string(), json!(format!("DELETED - {description}")));
    }
    next
}

impl ClientSecretHandler {
    pub fn new(identity_clients: Arc<dyn RemoteObjects>, secrets: Arc<dyn RemoteObjects>) -> Self {
        Self {
            identity_clients,
            secrets,
        }
    }

    async fn fetch_client_secret(
        &self,
        ctx: &InvocationContext,
        spec: &SecretSpec,
    ) -> Result<String> {
        ctx.budget.check_or_fail()?;
        let client = self
            .identity_clients
            .read(&spec.client_id)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    Error::not_found(format!(
                        "client {} in pool {}",
                        spec.client_id, spec.pool_id
                    ))
                } else {
                    Error::from(err)
                }
            })?;
        client
            .payload
            .get("ClientSecret")
            .and_then(Value::as_str)
            .filter(|secret| !secret.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::invalid_properties(format!(
                    "client {} has no secret; enable secret generation",
                    spec.client_id
                ))
            })
    }

    /// Write the secret entry, creating it when it does not exist yet.
    async fn upsert(&self, ctx: &InvocationContext, spec: &SecretSpec, secret: &str) -> Result<()> {
        let desired = spec.secret_payload(secret);
        match find_by_name(ctx, self.secrets.as_ref(), &spec.secret_name).await? {
            Some(existing) => {
                mutate_object(
                    &ctx.budget,
                    &ctx.config.conflict_retry,
                    self.secrets.as_ref(),
                    &existing.id,
                    |_| Ok(desired.clone()),
                )
                .await?;
            }
            None => {
                info!(secret = %spec.secret_name, "Secret entry not found, creating it");
                create_object(ctx, self.secrets.as_ref(), &spec.secret_name, "", desired).await?;
            }
        }
        Ok(())
    }

    fn output(ctx: &InvocationContext, spec: &SecretSpec) -> ResourceOutput {
        ResourceOutput::new(spec.physical_id())
            .with("SecretName", spec.secret_name.as_str())
            .with(
                "SecretArn",
                ctx.arn("secretsmanager", &format!("secret:{}", spec.secret_name)),
            )
            .with("UserPoolId", spec.pool_id.as_str())
            .with("ClientId", spec.client_id.as_str())
            .with("Status", "SecretUpdated")
    }
}

#[async_trait]
impl ResourceHandler for ClientSecretHandler {
    fn kind(&self) -> &str {
        "ClientSecret"
    }

    async fn create(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let spec = SecretSpec::from_properties(ctx.properties())?;
        info!(
            pool = %spec.pool_id,
            client = %spec.client_id,
            secret = %spec.secret_name,
            "Storing client secret"
        );

        let secret = self.fetch_client_secret(ctx, &spec).await?;
        self.upsert(ctx, &spec, &secret).await?;
        Ok(Self::output(ctx, &spec))
    }

    /// The client secret may have been regenerated, so update re-copies it.
    async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        self.create(ctx).await
    }

    async fn delete(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        let secret_name = ctx.properties().opt_str("SecretName");
        let mut warnings = Vec::new();

        if let Some(name) = secret_name {
            match find_by_name(ctx, self.secrets.as_ref(), name).await? {
                Some(existing) => {
                    let deleted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
                    let _ = mutate_object(
                        &ctx.budget,
                        &ctx.config.conflict_retry,
                        self.secrets.as_ref(),
                        &existing.id,
                        |payload| Ok(mark_deleted(payload, &deleted_at)),
                    )
                    .await
                    .or_warn("marking secret as deleted", &mut warnings);
                }
                None => info!(secret = name, "Secret entry already gone"),
            }
        }

        Ok(ResourceOutput::new(id)
            .with("Status", "Deleted")
            .with("SecretName", secret_name.unwrap_or("unknown"))
            .with_warnings(warnings))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use rekon_core::Verb;
    use rekon_reconciler::{InMemoryObjects, RemoteOp};

    use super::*;
    use crate::testing::context;

    const SECRET: &str = "s3cr3t-value";

    struct Backends {
        clients: Arc<InMemoryObjects>,
        secrets: Arc<InMemoryObjects>,
    }

    impl Backends {
        async fn new() -> Self {
            let clients = Arc::new(InMemoryObjects::new("identity-clients"));
            clients
                .seed_with_id("client-1", "api-client", json!({"ClientSecret": SECRET}))
                .await;
            Self {
                clients,
                secrets: Arc::new(InMemoryObjects::new("secrets")),
            }
        }

        fn handler(&self) -> ClientSecretHandler {
            ClientSecretHandler::new(self.clients.clone(), self.secrets.clone())
        }
    }

    fn props() -> Value {
        json!({"UserPoolId": "pool-1", "ClientId": "client-1", "SecretName": "api/client"})
    }

    #[tokio::test]
    async fn test_create_stores_secret_without_echoing_it() {
        let backends = Backends::new().await;
        let ctx = context("ClientSecret", Verb::Create, props(), None);
        let output = backends.handler().create(&ctx).await.unwrap();

        assert_eq!(output.physical_id, "client-secret-pool-1-client-1");
        assert!(!Value::Object(output.reported_data()).to_string().contains(SECRET));

        let id = backends.secrets.find_by_name("api/client").await.unwrap();
        let stored = backends.secrets.snapshot(&id).await.unwrap();
        assert_eq!(stored["SecretString"]["client_secret"], SECRET);
    }

    #[tokio::test]
    async fn test_update_is_idempotent() {
        let backends = Backends::new().await;
        let ctx = context("ClientSecret", Verb::Create, props(), None);
        backends.handler().create(&ctx).await.unwrap();

        let prior = Some("client-secret-pool-1-client-1");
        let update = context("ClientSecret", Verb::Update, props(), prior);
        backends.handler().update(&update).await.unwrap();
        assert_eq!(backends.secrets.calls(RemoteOp::Write).await, 0);
        assert_eq!(backends.secrets.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_client_fails() {
        let backends = Backends::new().await;
        let mut props = props();
        props["ClientId"] = json!("client-404");
        let ctx = context("ClientSecret", Verb::Create, props, None);
        let err = backends.handler().create(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_marks_secret_logically_deleted() {
        let backends = Backends::new().await;
        let ctx = context("ClientSecret", Verb::Create, props(), None);
        let id = backends.handler().create(&ctx).await.unwrap().physical_id;

        let delete = context("ClientSecret", Verb::Delete, props(), Some(&id));
        let output = backends.handler().delete(&delete).await.unwrap();
        assert_eq!(output.data["Status"], "Deleted");

        let secret_id = backends.secrets.find_by_name("api/client").await.unwrap();
        let stored = backends.secrets.snapshot(&secret_id).await.unwrap();
        assert_eq!(stored["SecretString"]["status"], DELETED);
        assert!(stored["SecretString"]["deleted_at"].is_string());
        assert!(stored["Description"].as_str().unwrap().starts_with("DELETED - "));
    }

    #[test]
    fn test_mark_deleted_is_stable() {
        let once = mark_deleted(&json!({"SecretString": {}, "Description": "d"}), "t1");
        assert_eq!(mark_deleted(&once, "t2"), once);
    }
}
