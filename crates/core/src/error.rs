//! Core error types for rekon operations.
//!
//! Two layers: [`RemoteError`] is what a remote-object capability reports,
//! [`Error`] is what the engine and handlers surface to the dispatcher.
//! Every [`Error`] maps onto exactly one [`ErrorClass`].

use thiserror::Error;

/// Failure modes a remote-object capability may report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The version token presented with a write or delete is stale.
    #[error("version conflict: {detail}")]
    Conflict { detail: String },

    /// The object is still referenced by something else.
    #[error("resource in use: {detail}")]
    InUse { detail: String },

    #[error("remote object '{id}' not found")]
    NotFound { id: String },

    /// A create collided with an object created under a different client token.
    #[error("remote object '{name}' already exists")]
    AlreadyExists { name: String, id: Option<String> },

    #[error("throttled: {detail}")]
    Throttled { detail: String },

    /// The remote refused the request as invalid.
    #[error("request rejected: {detail}")]
    Rejected { detail: String },

    #[error("remote failure: {detail}")]
    Fatal { detail: String },
}

impl RemoteError {
    /// Create a conflict error.
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::Conflict {
            detail: detail.into(),
        }
    }

    /// Create an in-use error.
    pub fn in_use(detail: impl Into<String>) -> Self {
        Self::InUse {
            detail: detail.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an already exists error.
    pub fn already_exists(name: impl Into<String>, id: Option<String>) -> Self {
        Self::AlreadyExists {
            name: name.into(),
            id,
        }
    }

    /// Create a throttled error.
    pub fn throttled(detail: impl Into<String>) -> Self {
        Self::Throttled {
            detail: detail.into(),
        }
    }

    /// Create a rejected error.
    pub fn rejected(detail: impl Into<String>) -> Self {
        Self::Rejected {
            detail: detail.into(),
        }
    }

    /// Create a fatal remote error.
    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::Fatal {
            detail: detail.into(),
        }
    }

    /// Whether this is a `NotFound`.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Retry classification used by the backoff retrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry after backoff.
    Transient,
    /// Stale token or busy resource; re-read and retry.
    Conflict,
    /// The target is absent.
    NotFound,
    /// Stop immediately.
    Fatal,
}

/// Default classification of remote failures.
pub const fn classify_remote(error: &RemoteError) -> RetryClass {
    match error {
        RemoteError::Conflict { .. } | RemoteError::InUse { .. } => RetryClass::Conflict,
        RemoteError::Throttled { .. } => RetryClass::Transient,
        RemoteError::NotFound { .. } => RetryClass::NotFound,
        RemoteError::AlreadyExists { .. }
        | RemoteError::Rejected { .. }
        | RemoteError::Fatal { .. } => RetryClass::Fatal,
    }
}

/// User-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Conflict,
    NotFound,
    BudgetExceeded,
    ResourceFailed,
    Fatal,
}

/// Core error type for rekon operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },

    #[error("unsupported resource type: {kind}")]
    UnsupportedResourceType { kind: String },

    #[error("invalid properties: {reason}")]
    InvalidProperties { reason: String },

    #[error("version conflict on '{resource}': {detail}")]
    Conflict { resource: String, detail: String },

    #[error("'{resource}' not found")]
    NotFound { resource: String },

    #[error("execution budget exceeded ({remaining_ms}ms remaining, {elapsed_ms}ms elapsed)")]
    BudgetExceeded { remaining_ms: u64, elapsed_ms: u64 },

    #[error("'{what}' did not converge within {waited_secs}s")]
    Timeout { what: String, waited_secs: u64 },

    #[error("'{resource}' failed: {reason}")]
    ResourceFailed { resource: String, reason: String },

    #[error("'{operation}' gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: RemoteError,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("callback delivery failed: {reason}")]
    Delivery { reason: String },

    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl Error {
    /// Create a malformed event error.
    pub fn malformed_event(reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            reason: reason.into(),
        }
    }

    /// Create an unsupported resource type error.
    pub fn unsupported_resource_type(kind: impl Into<String>) -> Self {
        Self::UnsupportedResourceType { kind: kind.into() }
    }

    /// Create an invalid properties error.
    pub fn invalid_properties(reason: impl Into<String>) -> Self {
        Self::InvalidProperties {
            reason: reason.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(resource: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            detail: detail.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a budget exceeded error.
    pub const fn budget_exceeded(remaining_ms: u64, elapsed_ms: u64) -> Self {
        Self::BudgetExceeded {
            remaining_ms,
            elapsed_ms,
        }
    }

    /// Create a convergence timeout error.
    pub fn timeout(what: impl Into<String>, waited_secs: u64) -> Self {
        Self::Timeout {
            what: what.into(),
            waited_secs,
        }
    }

    /// Create a resource failed error.
    pub fn resource_failed(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceFailed {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Create a retries exhausted error.
    pub fn retries_exhausted(
        operation: impl Into<String>,
        attempts: u32,
        last: RemoteError,
    ) -> Self {
        Self::RetriesExhausted {
            operation: operation.into(),
            attempts,
            last,
        }
    }

    /// Create a delivery error.
    pub fn delivery(reason: impl Into<String>) -> Self {
        Self::Delivery {
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Map onto the user-facing taxonomy.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::MalformedEvent { .. }
            | Self::UnsupportedResourceType { .. }
            | Self::InvalidProperties { .. }
            | Self::Config { .. } => ErrorClass::Validation,
            Self::Conflict { .. } => ErrorClass::Conflict,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::BudgetExceeded { .. } => ErrorClass::BudgetExceeded,
            Self::ResourceFailed { .. } => ErrorClass::ResourceFailed,
            Self::Remote(remote) => match remote {
                RemoteError::Conflict { .. } | RemoteError::InUse { .. } => ErrorClass::Conflict,
                RemoteError::NotFound { .. } => ErrorClass::NotFound,
                RemoteError::Rejected { .. } | RemoteError::AlreadyExists { .. } => {
                    ErrorClass::Validation
                }
                RemoteError::Throttled { .. } | RemoteError::Fatal { .. } => ErrorClass::Fatal,
            },
            Self::Timeout { .. }
            | Self::RetriesExhausted { .. }
            | Self::Delivery { .. }
            | Self::Internal { .. } => ErrorClass::Fatal,
        }
    }

    /// Whether the invocation ran out of time.
    pub const fn is_budget_exceeded(&self) -> bool {
        matches!(self, Self::BudgetExceeded { .. })
    }

    /// Whether the target was absent, either locally or as reported by the remote.
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Remote(RemoteError::NotFound { .. })
        )
    }
}
