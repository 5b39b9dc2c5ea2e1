//! Resource handler trait and registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use rekon_core::{Error, LifecycleEvent, Outcome, Properties, ResourceOutput, Result, Verb};
use rekon_reconciler::{Budget, EngineConfig};
use tracing::info;

use crate::ids;

/// Everything a handler may use during one invocation.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub event: LifecycleEvent,
    pub budget: Budget,
    pub config: Arc<EngineConfig>,
}

impl InvocationContext {
    pub fn new(event: LifecycleEvent, budget: Budget, config: Arc<EngineConfig>) -> Self {
        Self {
            event,
            budget,
            config,
        }
    }

    pub const fn properties(&self) -> &Properties {
        &self.event.properties
    }

    pub const fn verb(&self) -> Verb {
        self.event.verb
    }

    /// The physical id assigned by an earlier Create.
    ///
    /// # Errors
    ///
    /// Returns `MalformedEvent` when the orchestrator sent none.
    pub fn prior_id(&self) -> Result<&str> {
        self.event.prior_physical_id.as_deref().ok_or_else(|| {
            Error::malformed_event(format!("{} requires PhysicalResourceId", self.event.verb))
        })
    }

    /// Identity to report when no handler produced one.
    pub fn fallback_physical_id(&self) -> String {
        self.event.prior_physical_id.clone().unwrap_or_else(|| {
            format!(
                "{}-{}-{}",
                self.event.resource_kind,
                self.event.verb.as_str().to_lowercase(),
                self.event.correlation.request_id
            )
        })
    }

    /// Deterministic client token for a remote object owned by this resource.
    pub fn client_token(&self, name: &str, discriminator: &str) -> String {
        ids::client_token(
            &self.event.correlation,
            &self.event.resource_kind,
            name,
            discriminator,
        )
    }

    /// Render an identifier in the configured partition and region.
    pub fn arn(&self, service: &str, resource: &str) -> String {
        format!(
            "arn:{}:{service}:{}::{resource}",
            self.config.partition, self.config.region
        )
    }
}

/// Trait for resource lifecycle handlers.
///
/// Each resource kind implements create, update, and delete. Handlers return
/// plain results; [`run`] applies the verb's settlement policy.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Resource kind this handler serves (`ResourceProperties.ResourceType`).
    fn kind(&self) -> &str;

    async fn create(&self, ctx: &InvocationContext) -> Result<ResourceOutput>;

    /// Must be a no-op success when the resource already matches the properties.
    async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput>;

    /// Absence of the resource counts as success.
    async fn delete(&self, ctx: &InvocationContext) -> Result<ResourceOutput>;
}

/// Route the event's verb to `handler` and settle the result.
pub async fn run(handler: &dyn ResourceHandler, ctx: &InvocationContext) -> Outcome {
    info!(kind = handler.kind(), verb = %ctx.verb(), "Executing handler");
    let result = match ctx.verb() {
        Verb::Create => handler.create(ctx).await,
        Verb::Update => handler.update(ctx).await,
        Verb::Delete => handler.delete(ctx).await,
    };
    Outcome::settle(ctx.verb(), result, &ctx.fallback_physical_id())
}

/// Registry of resource handlers keyed by kind.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ResourceHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own kind.
    pub fn register(&mut self, handler: Arc<dyn ResourceHandler>) {
        self.handlers.insert(handler.kind().to_string(), handler);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, handler: Arc<dyn ResourceHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Get a handler by kind.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn ResourceHandler>> {
        self.handlers.get(kind).cloned()
    }

    /// Get a handler by kind, failing for unknown kinds.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedResourceType`.
    pub fn resolve(&self, kind: &str) -> Result<Arc<dyn ResourceHandler>> {
        self.get(kind)
            .ok_or_else(|| Error::unsupported_resource_type(kind))
    }

    pub fn has(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).sorted().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::time::Duration;

    use rekon_core::{CorrelationIds, RemoteError};
    use url::Url;

    use super::*;

    struct Echo;

    #[async_trait]
    impl ResourceHandler for Echo {
        fn kind(&self) -> &str {
            "Echo"
        }

        async fn create(&self, _ctx: &InvocationContext) -> Result<ResourceOutput> {
            Ok(ResourceOutput::new("echo-1"))
        }

        async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
            Ok(ResourceOutput::new(ctx.prior_id()?))
        }

        async fn delete(&self, _ctx: &InvocationContext) -> Result<ResourceOutput> {
            Err(Error::from(RemoteError::fatal("denied")))
        }
    }

    fn context(verb: Verb, prior: Option<&str>) -> InvocationContext {
        let event = LifecycleEvent {
            verb,
            resource_kind: "Echo".to_string(),
            properties: Properties::default(),
            old_properties: None,
            prior_physical_id: prior.map(str::to_string),
            callback_address: Url::parse("https://callback.example.com/x").unwrap(),
            correlation: CorrelationIds {
                stack_id: "stack".to_string(),
                request_id: "req-9".to_string(),
                logical_id: "Thing".to_string(),
            },
        };
        let config = Arc::new(EngineConfig::default());
        let budget = Budget::new(Duration::from_secs(900), &config.budget);
        InvocationContext::new(event, budget, config)
    }

    #[test]
    fn test_registry_resolves_by_kind() {
        let registry = HandlerRegistry::new().with(Arc::new(Echo));
        assert!(registry.has("Echo"));
        assert_eq!(registry.kinds(), vec!["Echo"]);
        assert!(matches!(
            registry.resolve("Nope"),
            Err(Error::UnsupportedResourceType { .. })
        ));
    }

    #[test]
    fn test_fallback_physical_id() {
        assert_eq!(context(Verb::Create, None).fallback_physical_id(), "Echo-create-req-9");
        assert_eq!(context(Verb::Delete, Some("p-1")).fallback_physical_id(), "p-1");
    }

    #[tokio::test]
    async fn test_run_settles_delete_leniently() {
        let outcome = run(&Echo, &context(Verb::Delete, Some("p-1"))).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.physical_id(), Some("p-1"));
    }

    #[tokio::test]
    async fn test_run_update_without_prior_id_fails() {
        let outcome = run(&Echo, &context(Verb::Update, None)).await;
        assert!(!outcome.is_success());
    }
}
