//! The response document sent to the callback address.

use rekon_core::CorrelationIds;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// Terminal status reported to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
}

impl ResponseStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a response goes and which request it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTarget {
    pub address: Url,
    pub correlation: CorrelationIds,
}

impl CallbackTarget {
    pub fn new(address: Url, correlation: CorrelationIds) -> Self {
        Self {
            address,
            correlation,
        }
    }
}

/// Fixed response envelope. `Data` is omitted only by the emergency response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseEnvelope {
    pub status: ResponseStatus,
    pub reason: String,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl ResponseEnvelope {
    pub fn new(
        status: ResponseStatus,
        reason: impl Into<String>,
        physical_resource_id: impl Into<String>,
        correlation: &CorrelationIds,
    ) -> Self {
        Self {
            status,
            reason: reason.into(),
            physical_resource_id: physical_resource_id.into(),
            stack_id: correlation.stack_id.clone(),
            request_id: correlation.request_id.clone(),
            logical_resource_id: correlation.logical_id.clone(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]

    use serde_json::json;

    use super::*;

    fn correlation() -> CorrelationIds {
        CorrelationIds {
            stack_id: "stack-1".to_string(),
            request_id: "req-1".to_string(),
            logical_id: "Link".to_string(),
        }
    }

    #[test]
    fn test_wire_shape() {
        let mut data = Map::new();
        data.insert("LinkId".to_string(), json!("links-1"));
        let envelope =
            ResponseEnvelope::new(ResponseStatus::Success, "ok", "links-1", &correlation())
                .with_data(data);

        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["Status"], "SUCCESS");
        assert_eq!(wire["PhysicalResourceId"], "links-1");
        assert_eq!(wire["StackId"], "stack-1");
        assert_eq!(wire["LogicalResourceId"], "Link");
        assert_eq!(wire["Data"]["LinkId"], "links-1");
    }

    #[test]
    fn test_data_omitted_when_absent() {
        let envelope = ResponseEnvelope::new(ResponseStatus::Failed, "x", "id", &correlation());
        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["Status"], "FAILED");
        assert!(wire.get("Data").is_none());
    }
}
