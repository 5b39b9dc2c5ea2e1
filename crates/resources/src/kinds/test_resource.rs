//! Smoke-test kind: touches nothing remote and always succeeds.

use async_trait::async_trait;
use rekon_core::{ResourceOutput, Result};

use crate::handler::{InvocationContext, ResourceHandler};

/// Handler for `Test`.
pub struct TestHandler;

impl TestHandler {
    fn output(ctx: &InvocationContext) -> ResourceOutput {
        let id = ctx
            .event
            .prior_physical_id
            .clone()
            .unwrap_or_else(|| format!("test-{}", ctx.event.correlation.logical_id));
        ResourceOutput::new(id).with("Status", "TestSuccess")
    }
}

#[async_trait]
impl ResourceHandler for TestHandler {
    fn kind(&self) -> &str {
        "Test"
    }

    async fn create(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        Ok(Self::output(ctx))
    }

    async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        Ok(Self::output(ctx))
    }

    async fn delete(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        Ok(ResourceOutput::new(ctx.fallback_physical_id()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use rekon_core::Verb;
    use serde_json::json;

    use super::*;
    use crate::testing::context;

    #[tokio::test]
    async fn test_reports_success() {
        let ctx = context("Test", Verb::Create, json!({}), None);
        let output = TestHandler.create(&ctx).await.unwrap();
        assert_eq!(output.physical_id, "test-TestResource");
        assert_eq!(output.data["Status"], "TestSuccess");

        let update = context("Test", Verb::Update, json!({}), Some("test-keep"));
        assert_eq!(TestHandler.update(&update).await.unwrap().physical_id, "test-keep");
    }
}
