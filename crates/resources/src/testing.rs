//! Shared fixtures for handler unit tests.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use rekon_core::{CorrelationIds, LifecycleEvent, Properties, Verb};
use rekon_reconciler::{Budget, EngineConfig};
use serde_json::{Map, Value};
use url::Url;

use crate::handler::InvocationContext;

fn properties(value: Value) -> Properties {
    match value {
        Value::Object(map) => Properties::new(map),
        _ => Properties::new(Map::new()),
    }
}

/// Context with a generous budget and default policies.
pub(crate) fn context(
    kind: &str,
    verb: Verb,
    props: Value,
    prior: Option<&str>,
) -> InvocationContext {
    context_with(kind, verb, props, None, prior, Duration::from_secs(900))
}

/// Update context carrying the previous properties.
pub(crate) fn update_context(
    kind: &str,
    props: Value,
    old: Value,
    prior: &str,
) -> InvocationContext {
    context_with(
        kind,
        Verb::Update,
        props,
        Some(old),
        Some(prior),
        Duration::from_secs(900),
    )
}

pub(crate) fn context_with(
    kind: &str,
    verb: Verb,
    props: Value,
    old: Option<Value>,
    prior: Option<&str>,
    remaining: Duration,
) -> InvocationContext {
    let event = LifecycleEvent {
        verb,
        resource_kind: kind.to_string(),
        properties: properties(props),
        old_properties: old.map(properties),
        prior_physical_id: prior.map(str::to_string),
        callback_address: Url::parse("https://callback.example.com/response").unwrap(),
        correlation: CorrelationIds {
            stack_id: "arn:aws:cloudformation:us-east-1:1:stack/demo/1".to_string(),
            request_id: "req-1".to_string(),
            logical_id: format!("{kind}Resource"),
        },
    };
    let config = Arc::new(EngineConfig::default());
    let budget = Budget::new(remaining, &config.budget);
    InvocationContext::new(event, budget, config)
}
