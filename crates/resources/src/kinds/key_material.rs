//! Public key for signed-request verification, optionally placed in a key group.
//!
//! The key's content hash is part of both its remote name and its client
//! token: new key material is a new remote key with a new physical id, and
//! the orchestrator's follow-up delete retires the old one.

use std::sync::Arc;

use async_trait::async_trait;
use rekon_core::{Error, Properties, ResourceOutput, Result};
use rekon_reconciler::{RemoteObjects, mutate_object};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{create_object, find_by_name, read_existing, remove};
use crate::handler::{InvocationContext, ResourceHandler};
use crate::ids;

const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";
const FINGERPRINT_CHARS: usize = 16;

/// Wrap bare base64 key content in PEM armor; armored input is kept as is.
pub fn pem_wrap(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.starts_with("-----BEGIN") {
        trimmed.to_string()
    } else {
        format!("{PEM_HEADER}\n{trimmed}\n{PEM_FOOTER}")
    }
}

fn fingerprint(pem: &str) -> String {
    ids::hash_input(pem.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>()
        .chars()
        .take(FINGERPRINT_CHARS)
        .collect()
}

/// Handler for `KeyMaterial`.
pub struct KeyMaterialHandler {
    public_keys: Arc<dyn RemoteObjects>,
    key_groups: Arc<dyn RemoteObjects>,
}

#[derive(Debug, Clone, PartialEq)]
struct KeySpec {
    name: String,
    pem: String,
    fingerprint: String,
    comment: String,
    group_name: Option<String>,
}

impl KeySpec {
    fn from_properties(props: &Properties) -> Result<Self> {
        props.require_fields(&["Name", "PublicKeyContent"])?;
        let pem = pem_wrap(props.require_str("PublicKeyContent")?);
        Ok(Self {
            name: props.require_str("Name")?.to_string(),
            fingerprint: fingerprint(&pem),
            pem,
            comment: props
                .opt_str("Comment")
                .unwrap_or("Public key for signed request verification")
                .to_string(),
            group_name: props.opt_str("KeyGroupName").map(str::to_string),
        })
    }

    fn remote_name(&self) -> String {
        let short: String = self.fingerprint.chars().take(8).collect();
        format!("{}-{short}", self.name)
    }

    fn payload(&self) -> Value {
        json!({
            "Name": self.name,
            "EncodedKey": self.pem,
            "Comment": self.comment,
        })
    }
}

fn group_items(group: &Value) -> Vec<String> {
    group
        .get("Items")
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

fn stored_pem(key: &Value) -> Option<&str> {
    key.get("EncodedKey").and_then(Value::as_str)
}

impl KeyMaterialHandler {
    pub fn new(public_keys: Arc<dyn RemoteObjects>, key_groups: Arc<dyn RemoteObjects>) -> Self {
        Self {
            public_keys,
            key_groups,
        }
    }

    /// Make the named group reference exactly `key_id`.
    async fn ensure_group(
        &self,
        ctx: &InvocationContext,
        group_name: &str,
        key_id: &str,
    ) -> Result<String> {
        let payload = json!({"Name": group_name, "Items": [key_id]});
        let groups = self.key_groups.as_ref();
        let group = create_object(ctx, groups, group_name, "", payload.clone()).await?;
        if !group.created {
            mutate_object(
                &ctx.budget,
                &ctx.config.conflict_retry,
                self.key_groups.as_ref(),
                &group.id,
                |_| Ok(payload.clone()),
            )
            .await?;
        }
        Ok(group.id)
    }

    /// Detach `key_id` from the group, deleting the group if nothing else is left.
    async fn release_group(
        &self,
        ctx: &InvocationContext,
        group_name: &str,
        key_id: &str,
    ) -> Result<()> {
        let Some(summary) = find_by_name(ctx, self.key_groups.as_ref(), group_name).await? else {
            return Ok(());
        };
        let Some(group) = read_existing(ctx, self.key_groups.as_ref(), &summary.id).await? else {
            return Ok(());
        };

        let items = group_items(&group.payload);
        if !items.iter().any(|item| item == key_id) {
            info!(group = %summary.id, key_id, "Key group no longer references this key");
            return Ok(());
        }
        if items.len() == 1 {
            remove(ctx, self.key_groups.as_ref(), &summary.id).await?;
            return Ok(());
        }

        mutate_object(
            &ctx.budget,
            &ctx.config.conflict_retry,
            self.key_groups.as_ref(),
            &summary.id,
            |payload| {
                let mut next = payload.clone();
                let remaining: Vec<Value> = group_items(payload)
                    .into_iter()
                    .filter(|item| item != key_id)
                    .map(Value::String)
                    .collect();
                if let Value::Object(map) = &mut next {
                    map.insert("Items".to_string(), Value::Array(remaining));
                }
                Ok(next)
            },
        )
        .await?;
        Ok(())
    }

    async fn publish(&self, ctx: &InvocationContext, spec: &KeySpec) -> Result<ResourceOutput> {
        let key = create_object(
            ctx,
            self.public_keys.as_ref(),
            &spec.remote_name(),
            &spec.fingerprint,
            spec.payload(),
        )
        .await?;

        let mut output = ResourceOutput::new(&key.id)
            .with("PublicKeyId", key.id.as_str())
            .with("KeyFingerprint", spec.fingerprint.as_str());
        if let Some(group_name) = &spec.group_name {
            let group_id = self.ensure_group(ctx, group_name, &key.id).await?;
            output = output.with("KeyGroupId", group_id);
        }
        Ok(output)
    }
}

#[async_trait]
impl ResourceHandler for KeyMaterialHandler {
    fn kind(&self) -> &str {
        "KeyMaterial"
    }

    async fn create(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let spec = KeySpec::from_properties(ctx.properties())?;
        info!(name = %spec.name, fingerprint = %spec.fingerprint, "Publishing public key");
        self.publish(ctx, &spec).await
    }

    async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        let spec = KeySpec::from_properties(ctx.properties())?;

        match read_existing(ctx, self.public_keys.as_ref(), id).await? {
            Some(current) if stored_pem(&current.payload) == Some(spec.pem.as_str()) => {
                info!(id, "Key material unchanged");
                let mut output = ResourceOutput::new(id)
                    .with("PublicKeyId", id)
                    .with("KeyFingerprint", spec.fingerprint.as_str());
                if let Some(group_name) = &spec.group_name {
                    let group_id = self.ensure_group(ctx, group_name, id).await?;
                    output = output.with("KeyGroupId", group_id);
                }
                Ok(output)
            }
            Some(_) => {
                info!(id, "Key material changed, publishing a new key");
                self.publish(ctx, &spec).await
            }
            None => {
                warn!(id, "Public key not found, recreating");
                self.publish(ctx, &spec).await
            }
        }
    }

    async fn delete(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        if let Some(group_name) = ctx.properties().opt_str("KeyGroupName") {
            self.release_group(ctx, group_name, id).await?;
        }
        remove(ctx, self.public_keys.as_ref(), id)
            .await
            .map_err(|err| match err {
                Error::RetriesExhausted { attempts, last, .. } => Error::retries_exhausted(
                    format!("delete public key '{id}' (still referenced)"),
                    attempts,
                    last,
                ),
                other => other,
            })?;
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

    struct Backends {
        keys: Arc<InMemoryObjects>,
        groups: Arc<InMemoryObjects>,
    }

    impl Backends {
        fn new() -> Self {
            Self {
                keys: Arc::new(InMemoryObjects::new("public-keys")),
                groups: Arc::new(InMemoryObjects::new("key-groups")),
            }
        }

        fn handler(&self) -> KeyMaterialHandler {
            KeyMaterialHandler::new(self.keys.clone(), self.groups.clone())
        }
    }

    fn props(key: &str) -> Value {
        json!({"Name": "signer", "PublicKeyContent": key, "KeyGroupName": "signers"})
    }

    #[test]
    fn test_pem_wrap() {
        assert_eq!(
            pem_wrap(" MIIB "),
            "-----BEGIN PUBLIC KEY-----\nMIIB\n-----END PUBLIC KEY-----"
        );
        let armored = "-----BEGIN PUBLIC KEY-----\nX\n-----END PUBLIC KEY-----";
        assert_eq!(pem_wrap(armored), armored);
    }

    #[tokio::test]
    async fn test_create_publishes_key_and_group() {
        let backends = Backends::new();
        let ctx = context("KeyMaterial", Verb::Create, props("AAAA"), None);
        let output = backends.handler().create(&ctx).await.unwrap();

        let key = backends.keys.snapshot(&output.physical_id).await.unwrap();
        assert!(key["EncodedKey"].as_str().unwrap().starts_with(PEM_HEADER));
        let group_id = output.data["KeyGroupId"].as_str().unwrap();
        assert_eq!(
            backends.groups.snapshot(group_id).await.unwrap()["Items"],
            json!([output.physical_id])
        );
    }

    #[tokio::test]
    async fn test_identical_key_is_a_no_op() {
        let backends = Backends::new();
        let ctx = context("KeyMaterial", Verb::Create, props("AAAA"), None);
        let id = backends.handler().create(&ctx).await.unwrap().physical_id;

        let update = update_context("KeyMaterial", props("AAAA"), props("AAAA"), &id);
        let output = backends.handler().update(&update).await.unwrap();

        assert_eq!(output.physical_id, id);
        assert_eq!(backends.keys.len().await, 1);
        assert_eq!(backends.groups.calls(RemoteOp::Write).await, 0);
    }

    #[tokio::test]
    async fn test_rotation_creates_new_key_and_repoints_group() {
        let backends = Backends::new();
        let ctx = context("KeyMaterial", Verb::Create, props("AAAA"), None);
        let old_id = backends.handler().create(&ctx).await.unwrap().physical_id;

        let update = update_context("KeyMaterial", props("BBBB"), props("AAAA"), &old_id);
        let output = backends.handler().update(&update).await.unwrap();
        assert_ne!(output.physical_id, old_id);
        assert_eq!(backends.keys.len().await, 2);

        let group_id = output.data["KeyGroupId"].as_str().unwrap().to_string();
        assert_eq!(
            backends.groups.snapshot(&group_id).await.unwrap()["Items"],
            json!([output.physical_id])
        );

        let retire = context("KeyMaterial", Verb::Delete, props("AAAA"), Some(&old_id));
        backends.handler().delete(&retire).await.unwrap();
        assert_eq!(backends.keys.len().await, 1);
        assert!(backends.groups.snapshot(&group_id).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_retries_while_key_in_use() {
        let backends = Backends::new();
        let ctx = context("KeyMaterial", Verb::Create, props("AAAA"), None);
        let id = backends.handler().create(&ctx).await.unwrap().physical_id;
        backends
            .keys
            .fail_times(RemoteOp::Delete, 2, RemoteError::in_use("referenced by distribution"))
            .await;

        let delete = context("KeyMaterial", Verb::Delete, props("AAAA"), Some(&id));
        backends.handler().delete(&delete).await.unwrap();

        assert_eq!(backends.keys.calls(RemoteOp::Delete).await, 3);
        assert!(backends.keys.is_empty().await);
        assert!(backends.groups.is_empty().await);
    }
}
