//! Lifecycle dispatcher.
//!
//! Drives one invocation through `Received → Validated → Executing →
//! Responding → Done`. A failure at any state jumps straight to
//! `Responding`, so every event with a usable callback address gets exactly
//! one response.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use rekon_callback::{CallbackTarget, DeliveryReport, ResponseDelivery, ResponseStatus};
use rekon_core::{Error, Outcome, RawEvent, Verb, event::parse_callback, sanitize_for_logging};
use rekon_reconciler::{Budget, EngineConfig};
use rekon_resources::{HandlerRegistry, InvocationContext, run};
use serde::Serialize;
use serde_json::Value;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Where an invocation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchState {
    Received,
    Validated,
    Executing,
    Responding,
    Done,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "Received",
            Self::Validated => "Validated",
            Self::Executing => "Executing",
            Self::Responding => "Responding",
            Self::Done => "Done",
        };
        f.write_str(name)
    }
}

/// What one invocation did, for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub final_state: DispatchState,
    pub status: ResponseStatus,
    pub physical_id: String,
    pub delivery: DeliveryReport,
}

/// Tracks transitions and logs each one.
struct Lifecycle {
    state: DispatchState,
}

impl Lifecycle {
    const fn new() -> Self {
        Self {
            state: DispatchState::Received,
        }
    }

    fn advance(&mut self, next: DispatchState) {
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }
}

pub struct Dispatcher {
    registry: HandlerRegistry,
    engine: Arc<EngineConfig>,
    delivery: ResponseDelivery,
}

impl Dispatcher {
    pub fn new(
        registry: HandlerRegistry,
        engine: EngineConfig,
        delivery: ResponseDelivery,
    ) -> Self {
        Self {
            registry,
            engine: Arc::new(engine),
            delivery,
        }
    }

    /// Dispatch an event document as received on the wire.
    pub async fn dispatch_json(&self, text: &str, remaining: Duration) -> DispatchReport {
        match RawEvent::from_json(text) {
            Ok(raw) => self.dispatch(raw, remaining).await,
            Err(parse_error) => {
                let raw = salvage(text);
                let mut lifecycle = Lifecycle::new();
                self.reject(&raw, &parse_error, &mut lifecycle).await
            }
        }
    }

    /// Run one invocation to completion. Never fails; the report carries the result.
    pub async fn dispatch(&self, raw: RawEvent, remaining: Duration) -> DispatchReport {
        let budget = Budget::new(remaining, &self.engine.budget);
        let correlation = raw.correlation();
        let span = info_span!(
            "invocation",
            request_id = %correlation.request_id,
            logical_id = %correlation.logical_id,
            kind = raw.resource_kind().unwrap_or("unknown"),
            verb = raw.request_type.as_deref().unwrap_or("unknown"),
        );
        self.run_lifecycle(raw, budget).instrument(span).await
    }

    async fn run_lifecycle(&self, raw: RawEvent, budget: Budget) -> DispatchReport {
        let mut lifecycle = Lifecycle::new();
        match serde_json::to_value(&raw) {
            Ok(document) => {
                info!(event = %sanitize_for_logging(&document), "Received lifecycle event");
            }
            Err(e) => warn!(error = %e, "Received lifecycle event that cannot be logged"),
        }

        let event = match raw.validate() {
            Ok(event) => event,
            Err(e) => return self.reject(&raw, &e, &mut lifecycle).await,
        };
        lifecycle.advance(DispatchState::Validated);

        let target =
            CallbackTarget::new(event.callback_address.clone(), event.correlation.clone());
        let verb = event.verb;
        let ctx = InvocationContext::new(event, budget, Arc::clone(&self.engine));
        let fallback_id = ctx.fallback_physical_id();

        let outcome = match self.registry.resolve(&ctx.event.resource_kind) {
            Err(e) if verb.is_delete() => {
                warn!(error = %e, "No handler for deleted resource; letting teardown continue");
                Outcome::lenient_delete(e, &fallback_id)
            }
            Err(e) => Outcome::settle(verb, Err(e), &fallback_id),
            Ok(handler) => match ctx.budget.check_or_fail() {
                Err(e) => Outcome::settle(verb, Err(e), &fallback_id),
                Ok(()) => {
                    lifecycle.advance(DispatchState::Executing);
                    AssertUnwindSafe(run(handler.as_ref(), &ctx))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            error!("Handler panicked");
                            let panicked = Error::internal("handler panicked");
                            Outcome::settle(verb, Err(panicked), &fallback_id)
                        })
                }
            },
        };

        self.respond(&target, verb, &outcome, &fallback_id, &mut lifecycle)
            .await
    }

    async fn respond(
        &self,
        target: &CallbackTarget,
        verb: Verb,
        outcome: &Outcome,
        fallback_id: &str,
        lifecycle: &mut Lifecycle,
    ) -> DispatchReport {
        lifecycle.advance(DispatchState::Responding);
        let status = if outcome.is_success() {
            ResponseStatus::Success
        } else {
            ResponseStatus::Failed
        };
        let physical_id = outcome.physical_id().unwrap_or(fallback_id).to_string();
        let detail = match outcome {
            Outcome::Fatal { error, .. } => Some(error.to_string()),
            Outcome::Success(_) | Outcome::LenientFailure { .. } => None,
        };
        info!(%verb, status = %status, physical_id = %physical_id, "Sending response");

        let delivery = self
            .delivery
            .deliver(target, status, &physical_id, detail.as_deref(), &outcome.data())
            .await;
        lifecycle.advance(DispatchState::Done);

        DispatchReport {
            final_state: lifecycle.state,
            status,
            physical_id,
            delivery,
        }
    }

    /// Respond with a failure to an event that never validated.
    async fn reject(
        &self,
        raw: &RawEvent,
        error: &Error,
        lifecycle: &mut Lifecycle,
    ) -> DispatchReport {
        error!(error = %error, "Rejecting invalid lifecycle event");
        let physical_id = raw
            .physical_resource_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| {
                format!(
                    "{}-invalid-{}",
                    raw.resource_kind().unwrap_or("unknown"),
                    raw.request_id.as_deref().unwrap_or("unknown")
                )
            });

        let Some(address) = raw
            .response_url
            .as_deref()
            .and_then(|address| parse_callback(address).ok())
        else {
            error!("Event has no usable ResponseURL; no response can be sent");
            lifecycle.advance(DispatchState::Done);
            return DispatchReport {
                final_state: lifecycle.state,
                status: ResponseStatus::Failed,
                physical_id,
                delivery: DeliveryReport::Undelivered {
                    reason: format!("no usable ResponseURL: {error}"),
                },
            };
        };

        let target = CallbackTarget::new(address, raw.correlation());
        let outcome = Outcome::Fatal {
            error: error.clone(),
            physical_id: Some(physical_id.clone()),
        };
        let verb = raw
            .request_type
            .as_deref()
            .and_then(|verb| verb.parse().ok())
            .unwrap_or(Verb::Create);
        self.respond(&target, verb, &outcome, &physical_id, lifecycle)
            .await
    }
}

/// Keep whatever string fields a malformed document still has, so it can be answered.
fn salvage(text: &str) -> RawEvent {
    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(text) else {
        return RawEvent::default();
    };
    let field = |name: &str| fields.get(name).and_then(Value::as_str).map(str::to_string);
    RawEvent {
        request_type: field("RequestType"),
        response_url: field("ResponseURL"),
        stack_id: field("StackId"),
        request_id: field("RequestId"),
        logical_resource_id: field("LogicalResourceId"),
        physical_resource_id: field("PhysicalResourceId"),
        resource_properties: None,
        old_resource_properties: None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]

    use async_trait::async_trait;
    use rekon_callback::{DeliveryConfig, MemoryTransport};
    use rekon_core::{ResourceOutput, Result};
    use rekon_resources::ResourceHandler;
    use serde_json::json;

    use super::*;

    struct Panics;

    #[async_trait]
    impl ResourceHandler for Panics {
        fn kind(&self) -> &str {
            "Panics"
        }

        #[allow(clippy::panic)]
        async fn create(&self, _ctx: &InvocationContext) -> Result<ResourceOutput> {
            panic!("boom")
        }

        async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
            self.create(ctx).await
        }

        async fn delete(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
            Ok(ResourceOutput::new(ctx.fallback_physical_id()))
        }
    }

    fn dispatcher(transport: &Arc<MemoryTransport>) -> Dispatcher {
        let registry = HandlerRegistry::new().with(Arc::new(Panics));
        Dispatcher::new(
            registry,
            EngineConfig::default(),
            ResponseDelivery::new(transport.clone(), DeliveryConfig::default()),
        )
    }

    fn event(verb: &str, kind: &str) -> String {
        json!({
            "RequestType": verb,
            "ResponseURL": "https://callback.example.com/r",
            "StackId": "stack-1",
            "RequestId": "req-1",
            "LogicalResourceId": "Res",
            "ResourceProperties": {"ResourceType": kind},
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_panicking_handler_still_responds() {
        let transport = Arc::new(MemoryTransport::new());
        let report = dispatcher(&transport)
            .dispatch_json(&event("Create", "Panics"), Duration::from_secs(900))
            .await;

        assert_eq!(report.status, ResponseStatus::Failed);
        assert_eq!(report.final_state, DispatchState::Done);
        assert_eq!(transport.count().await, 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget_skips_execution() {
        let transport = Arc::new(MemoryTransport::new());
        let report = dispatcher(&transport)
            .dispatch_json(&event("Create", "Panics"), Duration::from_secs(5))
            .await;

        assert_eq!(report.status, ResponseStatus::Failed);
        let envelope = transport.requests().await[0].envelope().unwrap();
        assert!(envelope.reason.contains("budget"));
    }

    #[tokio::test]
    async fn test_exhausted_budget_on_delete_is_flagged_success() {
        let transport = Arc::new(MemoryTransport::new());
        let report = dispatcher(&transport)
            .dispatch_json(&event("Delete", "Panics"), Duration::from_secs(5))
            .await;

        assert_eq!(report.status, ResponseStatus::Success);
        let envelope = transport.requests().await[0].envelope().unwrap();
        assert_eq!(envelope.data.unwrap()["Status"], "TimeoutOnDelete");
    }

    #[tokio::test]
    async fn test_unparseable_document_without_address_is_undelivered() {
        let transport = Arc::new(MemoryTransport::new());
        let report = dispatcher(&transport)
            .dispatch_json("not json", Duration::from_secs(900))
            .await;

        assert!(!report.delivery.is_delivered());
        assert_eq!(transport.count().await, 0);
    }

    #[tokio::test]
    async fn test_wrongly_typed_document_is_answered() {
        let transport = Arc::new(MemoryTransport::new());
        let text = json!({
            "RequestType": "Create",
            "ResponseURL": "https://callback.example.com/r",
            "RequestId": "req-2",
            "ResourceProperties": "not an object",
        })
        .to_string();

        let report = dispatcher(&transport)
            .dispatch_json(&text, Duration::from_secs(900))
            .await;

        assert_eq!(report.status, ResponseStatus::Failed);
        let envelope = transport.requests().await[0].envelope().unwrap();
        assert_eq!(envelope.request_id, "req-2");
        assert!(envelope.reason.contains("malformed event"));
    }

    #[tokio::test]
    async fn test_rejected_event_with_blank_physical_id_gets_fallback() {
        let transport = Arc::new(MemoryTransport::new());
        let text = json!({
            "RequestType": "Update",
            "ResponseURL": "https://callback.example.com/r",
            "RequestId": "req-3",
            "LogicalResourceId": "Res",
            "PhysicalResourceId": "",
            "ResourceProperties": {"ResourceType": "KeyMaterial"},
        })
        .to_string();

        let report = dispatcher(&transport)
            .dispatch_json(&text, Duration::from_secs(900))
            .await;

        assert_eq!(report.status, ResponseStatus::Failed);
        assert_eq!(report.physical_id, "KeyMaterial-invalid-req-3");
        let envelope = transport.requests().await[0].envelope().unwrap();
        assert_eq!(envelope.physical_resource_id, "KeyMaterial-invalid-req-3");
    }

    #[test]
    fn test_state_names() {
        assert_eq!(DispatchState::Responding.to_string(), "Responding");
    }
}
