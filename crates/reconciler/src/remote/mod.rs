//! Remote-object capability.
//!
//! Concrete API clients live outside this crate. The engine only needs to
//! create, read, write, and delete a named object guarded by a version token,
//! and to observe its provisioning status.

mod memory;

use std::fmt;

use async_trait::async_trait;
use rekon_core::RemoteError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use memory::InMemoryObjects;

/// Result of a single remote call.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Opaque value authorizing the next write. Invalidated by every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current payload of a remote object and the token that authorizes writing it.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedObject {
    pub id: String,
    pub name: String,
    pub payload: Value,
    pub token: VersionToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub name: String,
    /// Idempotency key. Repeating a create with the same token returns the same object.
    pub client_token: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedObject {
    pub id: String,
    pub token: VersionToken,
    /// False when an earlier create with the same client token was returned.
    pub created: bool,
}

/// Provisioning state reported by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStatus {
    pub state: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl RemoteStatus {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            reason: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is(&self, state: &str) -> bool {
        self.state.eq_ignore_ascii_case(state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub id: String,
    pub name: String,
}

/// Capability operations, used for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Create,
    Read,
    Write,
    Delete,
    Status,
    List,
}

/// Trait for remote-object backends.
#[async_trait]
pub trait RemoteObjects: Send + Sync {
    /// Service name used in logs and identifiers.
    fn service(&self) -> &str;

    /// Create an object, idempotently per client token.
    async fn create(&self, request: CreateRequest) -> RemoteResult<CreatedObject>;

    async fn read(&self, id: &str) -> RemoteResult<VersionedObject>;

    /// Replace the payload. Fails with `Conflict` if `token` is stale.
    async fn write(&self, id: &str, payload: Value, token: &VersionToken)
    -> RemoteResult<VersionToken>;

    /// Delete the object. Fails with `Conflict` if `token` is stale, `InUse` if still referenced.
    async fn delete(&self, id: &str, token: &VersionToken) -> RemoteResult<()>;

    async fn status(&self, id: &str) -> RemoteResult<RemoteStatus>;

    async fn list(&self) -> RemoteResult<Vec<ObjectSummary>>;
}
