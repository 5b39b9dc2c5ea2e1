//! Deterministic client tokens.
//!
//! ```text
//! namespace = UUID v5(OID, "{stack_id}/{logical_id}")
//! token     = UUID v5(namespace, SHA-256("{kind}|{name}|{discriminator}"))
//! ```
//!
//! The same logical resource always yields the same token, so a retried
//! create resolves to the object the first attempt made.

use rekon_core::CorrelationIds;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Namespace scoping every token to one logical resource of one stack.
#[must_use]
pub fn namespace_for(correlation: &CorrelationIds) -> Uuid {
    let scope = format!("{}/{}", correlation.stack_id, correlation.logical_id);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, scope.as_bytes())
}

/// SHA-256 digest of `data`.
#[must_use]
pub fn hash_input(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Client token for one remote object owned by a logical resource.
///
/// `discriminator` separates objects whose identity changes with their
/// content, such as key material.
#[must_use]
pub fn client_token(
    correlation: &CorrelationIds,
    kind: &str,
    name: &str,
    discriminator: &str,
) -> String {
    let digest = hash_input(format!("{kind}|{name}|{discriminator}").as_bytes());
    Uuid::new_v5(&namespace_for(correlation), &digest).to_string()
}
