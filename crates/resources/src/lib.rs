//! Resource handlers for the rekon reconciliation engine.
//!
//! A handler implements Create, Update and Delete for one resource kind on
//! top of the reconciler primitives. [`default_registry`] wires every
//! built-in kind to its remote backends; [`run`] executes one invocation and
//! settles its result into an [`Outcome`](rekon_core::Outcome).

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod handler;
pub mod ids;
pub mod kinds;
pub mod remotes;

#[cfg(test)]
mod testing;

pub use handler::{HandlerRegistry, InvocationContext, ResourceHandler, run};
pub use kinds::{
    ClientSecretHandler, DnsLookupHandler, EdgeFunctionAssociationHandler, FirewallHandler,
    FunctionFlavor, KeyMaterialHandler, NetworkLinkHandler, OriginAccessControlHandler,
    ResponsePolicyHandler, ScalingGroupHandler, TestHandler, ViewerFunctionHandler,
};
pub use remotes::{InMemoryRemotes, Remotes, default_registry};
