//! Terminal result of one lifecycle operation.
//!
//! Handlers return `Result<ResourceOutput>`. [`Outcome::settle`] turns that
//! into one of three explicit branches, so lenient delete is a visible
//! variant rather than a swallowed error.

use serde_json::{Map, Value};

use crate::error::Error;
use crate::event::Verb;

/// Key under which best-effort warnings are reported in the callback data.
pub const WARNINGS_KEY: &str = "Warnings";

/// What a handler produced for the orchestrator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceOutput {
    pub physical_id: String,
    pub data: Map<String, Value>,
    /// Best-effort steps that failed without failing the operation.
    pub warnings: Vec<String>,
}

impl ResourceOutput {
    pub fn new(physical_id: impl Into<String>) -> Self {
        Self {
            physical_id: physical_id.into(),
            data: Map::new(),
            warnings: Vec::new(),
        }
    }

    /// Add a data attribute.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Attach warnings collected during the operation.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Data as reported to the orchestrator, with warnings folded in.
    pub fn reported_data(&self) -> Map<String, Value> {
        let mut data = self.data.clone();
        if !self.warnings.is_empty() {
            data.insert(
                WARNINGS_KEY.to_string(),
                Value::String(self.warnings.join("; ")),
            );
        }
        data
    }
}

/// Flag reported when a delete is tolerated rather than completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    DeleteFailed,
    TimeoutOnDelete,
}

impl DeleteStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DeleteFailed => "DeleteFailed",
            Self::TimeoutOnDelete => "TimeoutOnDelete",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Success(ResourceOutput),
    /// Delete failed or ran out of time but is reported as success.
    LenientFailure {
        output: ResourceOutput,
        status: DeleteStatus,
        error: Error,
    },
    Fatal {
        error: Error,
        physical_id: Option<String>,
    },
}

impl Outcome {
    /// Settle a handler result under the verb's policy.
    ///
    /// On Delete, absence is success and every other failure is tolerated.
    /// `physical_id` is the identity to report when the handler produced none.
    pub fn settle(verb: Verb, result: crate::Result<ResourceOutput>, physical_id: &str) -> Self {
        match result {
            Ok(output) => Self::Success(output),
            Err(error) if verb.is_delete() && error.is_not_found() => {
                tracing::info!(error = %error, "Resource already absent; delete succeeds");
                Self::Success(ResourceOutput::new(physical_id).with("Status", "AlreadyDeleted"))
            }
            Err(error) if verb.is_delete() => Self::lenient_delete(error, physical_id),
            Err(error) => Self::Fatal {
                error,
                physical_id: Some(physical_id.to_string()),
            },
        }
    }

    /// Tolerated delete failure carrying the failure detail in its data.
    pub fn lenient_delete(error: Error, physical_id: &str) -> Self {
        let status = if error.is_budget_exceeded() || matches!(error, Error::Timeout { .. }) {
            DeleteStatus::TimeoutOnDelete
        } else {
            DeleteStatus::DeleteFailed
        };
        tracing::warn!(
            error = %error,
            status = status.as_str(),
            "Delete did not complete; reporting success so teardown can continue"
        );
        let output = ResourceOutput::new(physical_id)
            .with("Status", status.as_str())
            .with("Error", error.to_string());
        Self::LenientFailure {
            output,
            status,
            error,
        }
    }

    /// Whether the callback reports success.
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Fatal { .. })
    }

    pub fn physical_id(&self) -> Option<&str> {
        match self {
            Self::Success(output) | Self::LenientFailure { output, .. } => {
                Some(output.physical_id.as_str()).filter(|id| !id.is_empty())
            }
            Self::Fatal { physical_id, .. } => physical_id.as_deref(),
        }
    }

    /// Callback data for this outcome.
    pub fn data(&self) -> Map<String, Value> {
        match self {
            Self::Success(output) | Self::LenientFailure { output, .. } => output.reported_data(),
            Self::Fatal { error, .. } => {
                let mut data = Map::new();
                data.insert("Error".to_string(), Value::String(error.to_string()));
                data
            }
        }
    }

    pub const fn error(&self) -> Option<&Error> {
        match self {
            Self::Success(_) => None,
            Self::LenientFailure { error, .. } | Self::Fatal { error, .. } => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]

    use super::*;
    use crate::error::RemoteError;

    #[test]
    fn test_warnings_folded_into_data() {
        let output = ResourceOutput::new("id-1")
            .with("Arn", "arn:x")
            .with_warnings(vec!["a failed".into(), "b failed".into()]);
        let data = output.reported_data();
        assert_eq!(data["Warnings"], "a failed; b failed");
        assert_eq!(data["Arn"], "arn:x");
        assert!(ResourceOutput::new("x").reported_data().is_empty());
    }

    #[test]
    fn test_delete_failure_is_lenient() {
        let outcome = Outcome::settle(
            Verb::Delete,
            Err(Error::from(RemoteError::fatal("access denied"))),
            "id-1",
        );
        assert!(outcome.is_success());
        let data = outcome.data();
        assert_eq!(data["Status"], "DeleteFailed");
        assert!(data["Error"].as_str().unwrap().contains("access denied"));
        assert_eq!(outcome.physical_id(), Some("id-1"));
    }

    #[test]
    fn test_delete_budget_exceeded_is_timeout_on_delete() {
        let outcome = Outcome::settle(Verb::Delete, Err(Error::budget_exceeded(1, 2)), "id-1");
        assert!(matches!(
            outcome,
            Outcome::LenientFailure {
                status: DeleteStatus::TimeoutOnDelete,
                ..
            }
        ));
    }

    #[test]
    fn test_delete_not_found_is_plain_success() {
        let outcome = Outcome::settle(
            Verb::Delete,
            Err(Error::from(RemoteError::not_found("gone"))),
            "id-1",
        );
        assert!(matches!(outcome, Outcome::Success(_)));
    }

    #[test]
    fn test_create_failure_is_fatal() {
        let outcome = Outcome::settle(Verb::Create, Err(Error::invalid_properties("Name")), "id-1");
        assert!(!outcome.is_success());
        assert!(outcome.data()["Error"].as_str().unwrap().contains("Name"));
    }
}
