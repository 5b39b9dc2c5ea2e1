//! Read-only lookup of the hosted zone serving a domain.

use std::sync::Arc;

use async_trait::async_trait;
use rekon_core::{Error, ResourceOutput, Result};
use rekon_reconciler::{ObjectSummary, RemoteObjects};
use tracing::info;

use crate::handler::{InvocationContext, ResourceHandler};

const ZONE_PREFIX: &str = "/hostedzone/";

/// Handler for `DnsLookup`.
pub struct DnsLookupHandler {
    zones: Arc<dyn RemoteObjects>,
}

/// The zone with the longest name that is `domain` or a parent of it.
fn best_zone<'a>(zones: &'a [ObjectSummary], domain: &str) -> Option<&'a ObjectSummary> {
    let domain = domain.trim_end_matches('.');
    zones
        .iter()
        .filter(|zone| {
            let name = zone.name.trim_end_matches('.');
            !name.is_empty()
                && (domain == name
                    || domain
                        .strip_suffix(name)
                        .is_some_and(|rest| rest.ends_with('.')))
        })
        .max_by_key(|zone| zone.name.trim_end_matches('.').len())
}

fn bare_zone_id(id: &str) -> &str {
    id.strip_prefix(ZONE_PREFIX).unwrap_or(id)
}

impl DnsLookupHandler {
    pub fn new(zones: Arc<dyn RemoteObjects>) -> Self {
        Self { zones }
    }

    async fn lookup(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let domain = ctx.properties().require_str("DomainName")?;
        ctx.budget.check_or_fail()?;
        let zones = self.zones.list().await?;

        let zone = best_zone(&zones, domain)
            .ok_or_else(|| Error::not_found(format!("hosted zone for domain {domain}")))?;
        let zone_id = bare_zone_id(&zone.id);
        info!(domain, zone_id, zone = %zone.name, "Resolved hosted zone");

        Ok(ResourceOutput::new(format!("zone-lookup-{domain}-{zone_id}"))
            .with("HostedZoneId", zone_id)
            .with("ZoneName", zone.name.trim_end_matches('.')))
    }
}

#[async_trait]
impl ResourceHandler for DnsLookupHandler {
    fn kind(&self) -> &str {
        "DnsLookup"
    }

    async fn create(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        self.lookup(ctx).await
    }

    async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        self.lookup(ctx).await
    }

    async fn delete(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        Ok(ResourceOutput::new(ctx.fallback_physical_id()))
    }
}
