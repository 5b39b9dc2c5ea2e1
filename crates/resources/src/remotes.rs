//! Remote capabilities handed to the handlers, one per remote service.

use std::sync::Arc;

use rekon_reconciler::{InMemoryObjects, RemoteObjects};

use crate::handler::HandlerRegistry;
use crate::kinds::{
    ClientSecretHandler, DnsLookupHandler, EdgeFunctionAssociationHandler, FirewallHandler,
    FunctionFlavor, KeyMaterialHandler, NetworkLinkHandler, OriginAccessControlHandler,
    ResponsePolicyHandler, ScalingGroupHandler, TestHandler, ViewerFunctionHandler,
};

/// Capability objects for one invocation.
#[derive(Clone)]
pub struct Remotes {
    pub links: Arc<dyn RemoteObjects>,
    pub templates: Arc<dyn RemoteObjects>,
    pub groups: Arc<dyn RemoteObjects>,
    pub scaling_policies: Arc<dyn RemoteObjects>,
    pub ip_sets: Arc<dyn RemoteObjects>,
    pub acls: Arc<dyn RemoteObjects>,
    pub public_keys: Arc<dyn RemoteObjects>,
    pub key_groups: Arc<dyn RemoteObjects>,
    pub identity_clients: Arc<dyn RemoteObjects>,
    pub secrets: Arc<dyn RemoteObjects>,
    pub zones: Arc<dyn RemoteObjects>,
    pub distributions: Arc<dyn RemoteObjects>,
    pub header_policies: Arc<dyn RemoteObjects>,
    pub access_controls: Arc<dyn RemoteObjects>,
    pub functions: Arc<dyn RemoteObjects>,
}

/// In-memory backends with their concrete type kept, for seeding and inspection.
#[derive(Debug, Clone)]
pub struct InMemoryRemotes {
    pub links: Arc<InMemoryObjects>,
    pub templates: Arc<InMemoryObjects>,
    pub groups: Arc<InMemoryObjects>,
    pub scaling_policies: Arc<InMemoryObjects>,
    pub ip_sets: Arc<InMemoryObjects>,
    pub acls: Arc<InMemoryObjects>,
    pub public_keys: Arc<InMemoryObjects>,
    pub key_groups: Arc<InMemoryObjects>,
    pub identity_clients: Arc<InMemoryObjects>,
    pub secrets: Arc<InMemoryObjects>,
    pub zones: Arc<InMemoryObjects>,
    pub distributions: Arc<InMemoryObjects>,
    pub header_policies: Arc<InMemoryObjects>,
    pub access_controls: Arc<InMemoryObjects>,
    pub functions: Arc<InMemoryObjects>,
}

impl Default for InMemoryRemotes {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemotes {
    pub fn new() -> Self {
        let store = |service: &str| Arc::new(InMemoryObjects::new(service));
        Self {
            links: store("links"),
            templates: store("templates"),
            groups: Arc::new(InMemoryObjects::with_ready_status("groups", "InService")),
            scaling_policies: store("scaling-policies"),
            ip_sets: store("ip-sets"),
            acls: store("acls"),
            public_keys: store("public-keys"),
            key_groups: store("key-groups"),
            identity_clients: store("identity-clients"),
            secrets: store("secrets"),
            zones: store("zones"),
            distributions: Arc::new(InMemoryObjects::with_ready_status(
                "distributions",
                "Deployed",
            )),
            header_policies: store("header-policies"),
            access_controls: store("origin-access-controls"),
            functions: store("functions"),
        }
    }

    /// Type-erased view for the handlers.
    pub fn remotes(&self) -> Remotes {
        Remotes {
            links: self.links.clone(),
            templates: self.templates.clone(),
            groups: self.groups.clone(),
            scaling_policies: self.scaling_policies.clone(),
            ip_sets: self.ip_sets.clone(),
            acls: self.acls.clone(),
            public_keys: self.public_keys.clone(),
            key_groups: self.key_groups.clone(),
            identity_clients: self.identity_clients.clone(),
            secrets: self.secrets.clone(),
            zones: self.zones.clone(),
            distributions: self.distributions.clone(),
            header_policies: self.header_policies.clone(),
            access_controls: self.access_controls.clone(),
            functions: self.functions.clone(),
        }
    }

    /// Backend by service name, as used in fixture files.
    pub fn by_service(&self, service: &str) -> Option<&Arc<InMemoryObjects>> {
        match service {
            "links" => Some(&self.links),
            "templates" => Some(&self.templates),
            "groups" => Some(&self.groups),
            "scaling_policies" | "scaling-policies" => Some(&self.scaling_policies),
            "ip_sets" | "ip-sets" => Some(&self.ip_sets),
            "acls" => Some(&self.acls),
            "public_keys" | "public-keys" => Some(&self.public_keys),
            "key_groups" | "key-groups" => Some(&self.key_groups),
            "identity_clients" | "identity-clients" => Some(&self.identity_clients),
            "secrets" => Some(&self.secrets),
            "zones" => Some(&self.zones),
            "distributions" => Some(&self.distributions),
            "header_policies" | "header-policies" => Some(&self.header_policies),
            "access_controls" | "origin-access-controls" => Some(&self.access_controls),
            "functions" => Some(&self.functions),
            _ => None,
        }
    }
}

/// Registry with every built-in resource kind wired to `remotes`.
pub fn default_registry(remotes: &Remotes) -> HandlerRegistry {
    HandlerRegistry::new()
        .with(Arc::new(NetworkLinkHandler::new(remotes.links.clone())))
        .with(Arc::new(ScalingGroupHandler::new(
            remotes.templates.clone(),
            remotes.groups.clone(),
            remotes.scaling_policies.clone(),
        )))
        .with(Arc::new(FirewallHandler::new(
            remotes.ip_sets.clone(),
            remotes.acls.clone(),
        )))
        .with(Arc::new(KeyMaterialHandler::new(
            remotes.public_keys.clone(),
            remotes.key_groups.clone(),
        )))
        .with(Arc::new(ClientSecretHandler::new(
            remotes.identity_clients.clone(),
            remotes.secrets.clone(),
        )))
        .with(Arc::new(DnsLookupHandler::new(remotes.zones.clone())))
        .with(Arc::new(EdgeFunctionAssociationHandler::new(
            remotes.distributions.clone(),
        )))
        .with(Arc::new(ResponsePolicyHandler::new(
            remotes.header_policies.clone(),
        )))
        .with(Arc::new(OriginAccessControlHandler::new(
            remotes.access_controls.clone(),
        )))
        .with(Arc::new(ViewerFunctionHandler::new(
            FunctionFlavor::SigninGate,
            remotes.functions.clone(),
        )))
        .with(Arc::new(ViewerFunctionHandler::new(
            FunctionFlavor::PathRewrite,
            remotes.functions.clone(),
        )))
        .with(Arc::new(TestHandler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_every_kind() {
        let registry = default_registry(&InMemoryRemotes::new().remotes());
        assert_eq!(
            registry.kinds(),
            vec![
                "ClientSecret",
                "DnsLookup",
                "EdgeFunctionAssociation",
                "Firewall",
                "Function",
                "KeyMaterial",
                "NetworkLink",
                "OriginAccessControl",
                "PathRewriteFunction",
                "ResponsePolicy",
                "ScalingGroup",
                "Test",
            ]
        );
    }

    #[test]
    fn test_by_service() {
        let remotes = InMemoryRemotes::new();
        assert!(remotes.by_service("ip_sets").is_some());
        assert!(remotes.by_service("origin-access-controls").is_some());
        assert!(remotes.by_service("nope").is_none());
    }
}
