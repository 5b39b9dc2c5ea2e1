//! Lifecycle event model.
//!
//! The orchestrator sends a loosely-typed JSON document. [`RawEvent`] mirrors
//! that document field for field with every field optional, so a malformed
//! event can still be answered. [`LifecycleEvent`] is the validated form the
//! dispatcher routes on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::Error;
use crate::properties::Properties;
use crate::result::Result;

/// Property that selects the resource handler.
pub const RESOURCE_TYPE_PROPERTY: &str = "ResourceType";

const REDACTED_FIELDS: [&str; 2] = ["ResponseURL", "StackId"];
const SENSITIVE_PROPERTY_MARKERS: [&str; 5] = ["Password", "Secret", "Key", "Token", "Credential"];

/// Lifecycle verb requested by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    Create,
    Update,
    Delete,
}

impl Verb {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }

    pub const fn is_delete(self) -> bool {
        matches!(self, Self::Delete)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Create" => Ok(Self::Create),
            "Update" => Ok(Self::Update),
            "Delete" => Ok(Self::Delete),
            other => Err(Error::malformed_event(format!(
                "unknown RequestType '{other}'"
            ))),
        }
    }
}

/// Identifiers echoed back in every callback.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CorrelationIds {
    pub stack_id: String,
    pub request_id: String,
    pub logical_id: String,
}

/// The inbound document exactly as the orchestrator sent it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawEvent {
    #[serde(default)]
    pub request_type: Option<String>,
    #[serde(default, rename = "ResponseURL")]
    pub response_url: Option<String>,
    #[serde(default)]
    pub stack_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub logical_resource_id: Option<String>,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: Option<Map<String, Value>>,
    #[serde(default)]
    pub old_resource_properties: Option<Map<String, Value>>,
}

impl RawEvent {
    /// Parse an event document. Unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns `MalformedEvent` if the text is not a JSON object of the expected shape.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::malformed_event(format!("event is not valid JSON: {e}")))
    }

    /// Correlation identifiers, with absent fields left empty.
    pub fn correlation(&self) -> CorrelationIds {
        CorrelationIds {
            stack_id: self.stack_id.clone().unwrap_or_default(),
            request_id: self.request_id.clone().unwrap_or_default(),
            logical_id: self.logical_resource_id.clone().unwrap_or_default(),
        }
    }

    /// Whether the orchestrator asked for a delete, even if the rest is malformed.
    pub fn is_delete(&self) -> bool {
        self.request_type.as_deref() == Some(Verb::Delete.as_str())
    }

    /// Resource kind if present.
    pub fn resource_kind(&self) -> Option<&str> {
        self.resource_properties
            .as_ref()
            .and_then(|props| props.get(RESOURCE_TYPE_PROPERTY))
            .and_then(Value::as_str)
    }

    /// Validate into a [`LifecycleEvent`].
    ///
    /// # Errors
    ///
    /// Returns `MalformedEvent` when the verb, resource kind, callback address,
    /// or any correlation identifier is absent, or the callback address is not
    /// an http(s) URL.
    pub fn validate(&self) -> Result<LifecycleEvent> {
        let verb = required(self.request_type.as_deref(), "RequestType")?.parse::<Verb>()?;
        let properties = self
            .resource_properties
            .clone()
            .ok_or_else(|| Error::malformed_event("missing ResourceProperties"))?;
        let resource_kind = required(self.resource_kind(), "ResourceProperties.ResourceType")?;
        let address = required(self.response_url.as_deref(), "ResponseURL")?;
        let callback_address = parse_callback(address)?;

        let correlation = CorrelationIds {
            stack_id: required(self.stack_id.as_deref(), "StackId")?.to_string(),
            request_id: required(self.request_id.as_deref(), "RequestId")?.to_string(),
            logical_id: required(self.logical_resource_id.as_deref(), "LogicalResourceId")?
                .to_string(),
        };

        Ok(LifecycleEvent {
            verb,
            resource_kind: resource_kind.to_string(),
            properties: Properties::new(properties),
            old_properties: self.old_resource_properties.clone().map(Properties::new),
            prior_physical_id: self
                .physical_resource_id
                .clone()
                .filter(|id| !id.is_empty()),
            callback_address,
            correlation,
        })
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::malformed_event(format!("missing {field}")))
}

/// Parse a callback address, accepting only http and https.
///
/// # Errors
///
/// Returns `MalformedEvent` for unparseable or non-http(s) addresses.
pub fn parse_callback(address: &str) -> Result<Url> {
    let url = Url::parse(address)
        .map_err(|e| Error::malformed_event(format!("invalid ResponseURL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(Error::malformed_event(format!(
            "ResponseURL scheme '{scheme}' is not http(s)"
        ))),
    }
}

/// A validated lifecycle event. Immutable for the rest of the invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub verb: Verb,
    pub resource_kind: String,
    pub properties: Properties,
    /// Properties before the change; present on Update only.
    pub old_properties: Option<Properties>,
    pub prior_physical_id: Option<String>,
    pub callback_address: Url,
    pub correlation: CorrelationIds,
}

/// Redact a raw event document for logging.
///
/// `ResponseURL` and `StackId` are replaced wholesale. Any resource property
/// whose key mentions a credential-like word becomes `<REDACTED>`.
pub fn sanitize_for_logging(event: &Value) -> Value {
    let Value::Object(fields) = event else {
        return Value::String("<non-object event>".to_string());
    };

    let sanitized = fields
        .iter()
        .map(|(key, value)| {
            let value = if REDACTED_FIELDS.contains(&key.as_str()) {
                Value::String(format!("<{key}_REDACTED>"))
            } else if key == "ResourceProperties" || key == "OldResourceProperties" {
                redact_properties(value)
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect();

    Value::Object(sanitized)
}

fn redact_properties(value: &Value) -> Value {
    match value {
        Value::Object(props) => Value::Object(
            props
                .iter()
                .map(|(key, value)| {
                    if SENSITIVE_PROPERTY_MARKERS
                        .iter()
                        .any(|marker| key.contains(marker))
                    {
                        (key.clone(), Value::String("<REDACTED>".to_string()))
                    } else {
                        (key.clone(), value.clone())
                    }
                })
                .collect(),
        ),
        other => other.clone(),
    }
}
