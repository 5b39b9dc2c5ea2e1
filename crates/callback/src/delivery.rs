//! Response delivery with fallback data and one emergency attempt.
//!
//! Delivery never fails the invocation: unserializable data is replaced by
//! an error marker, a failed PUT gets one minimal retry, and if that fails
//! too the outcome is logged and reported as [`DeliveryReport::Undelivered`].

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{error, info, warn};

use crate::envelope::{CallbackTarget, ResponseEnvelope, ResponseStatus};
use crate::transport::CallbackTransport;

const EXPECTED_STATUS: [u16; 3] = [200, 201, 202];

/// Delivery timeouts and reason formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub primary_timeout_ms: u64,
    pub emergency_timeout_ms: u64,
    /// Log location named in every `Reason`.
    pub log_stream: String,
    /// Characters of the original data kept when it cannot be serialized.
    pub fallback_data_chars: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            primary_timeout_ms: 30_000,
            emergency_timeout_ms: 10_000,
            log_stream: "unknown".to_string(),
            fallback_data_chars: 500,
        }
    }
}

impl DeliveryConfig {
    pub const fn primary_timeout(&self) -> Duration {
        Duration::from_millis(self.primary_timeout_ms)
    }

    pub const fn emergency_timeout(&self) -> Duration {
        Duration::from_millis(self.emergency_timeout_ms)
    }
}

/// How the one response of an invocation reached the orchestrator, if at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryReport {
    Delivered { status_code: u16 },
    DeliveredWithFallbackData { status_code: u16 },
    DeliveredEmergency { status_code: u16 },
    Undelivered { reason: String },
}

impl DeliveryReport {
    pub const fn is_delivered(&self) -> bool {
        !matches!(self, Self::Undelivered { .. })
    }

    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Delivered { status_code }
            | Self::DeliveredWithFallbackData { status_code }
            | Self::DeliveredEmergency { status_code } => Some(*status_code),
            Self::Undelivered { .. } => None,
        }
    }
}

/// Sends exactly one terminal response per invocation.
#[derive(Clone)]
pub struct ResponseDelivery {
    transport: Arc<dyn CallbackTransport>,
    config: DeliveryConfig,
}

impl ResponseDelivery {
    pub fn new(transport: Arc<dyn CallbackTransport>, config: DeliveryConfig) -> Self {
        Self { transport, config }
    }

    pub const fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Human-readable reason pointing at the detailed logs.
    fn reason(&self, detail: Option<&str>) -> String {
        let pointer = format!("See CloudWatch Log Stream: {}", self.config.log_stream);
        match detail {
            Some(detail) if !detail.is_empty() => format!("{detail}. {pointer}"),
            _ => pointer,
        }
    }

    /// Data as a flat mapping, or the substitute used when it cannot be serialized.
    fn encode_data<D>(&self, data: &D) -> (Map<String, Value>, bool)
    where
        D: Serialize + Debug + ?Sized,
    {
        match serde_json::to_value(data) {
            Ok(Value::Object(map)) => (map, false),
            Ok(Value::Null) => (Map::new(), false),
            Ok(other) => {
                let mut map = Map::new();
                map.insert("Result".to_string(), Value::String(other.to_string()));
                (map, false)
            }
            Err(e) => {
                error!(error = %e, "Response data is not serializable, sending substitute");
                let original: String = format!("{data:?}")
                    .chars()
                    .take(self.config.fallback_data_chars)
                    .collect();
                let mut map = Map::new();
                map.insert("Error".to_string(), json!("JSON serialization failed"));
                map.insert("OriginalData".to_string(), Value::String(original));
                (map, true)
            }
        }
    }

    /// Deliver the terminal response for `target`.
    ///
    /// `detail` is a redacted summary prepended to the log pointer.
    pub async fn deliver<D>(
        &self,
        target: &CallbackTarget,
        status: ResponseStatus,
        physical_id: &str,
        detail: Option<&str>,
        data: &D,
    ) -> DeliveryReport
    where
        D: Serialize + Debug + ?Sized,
    {
        let (data, substituted) = self.encode_data(data);
        let reason = self.reason(detail);
        let envelope = ResponseEnvelope::new(status, reason, physical_id, &target.correlation)
            .with_data(data);

        let failure = match serde_json::to_string(&envelope) {
            Ok(body) => {
                match self
                    .transport
                    .put(&target.address, body, self.config.primary_timeout())
                    .await
                {
                    Ok(status_code) => {
                        log_reply(status_code, status);
                        return if substituted {
                            DeliveryReport::DeliveredWithFallbackData { status_code }
                        } else {
                            DeliveryReport::Delivered { status_code }
                        };
                    }
                    Err(e) => e.to_string(),
                }
            }
            Err(e) => format!("cannot serialize response envelope: {e}"),
        };

        error!(error = %failure, "Response delivery failed, sending emergency response");
        self.deliver_emergency(target, physical_id, &failure).await
    }

    async fn deliver_emergency(
        &self,
        target: &CallbackTarget,
        physical_id: &str,
        failure: &str,
    ) -> DeliveryReport {
        let envelope = ResponseEnvelope::new(
            ResponseStatus::Failed,
            format!("Emergency response - {}", self.reason(None)),
            physical_id,
            &target.correlation,
        );
        let body = match serde_json::to_string(&envelope) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Emergency response could not be serialized");
                return DeliveryReport::Undelivered {
                    reason: format!("{failure}; emergency response not serializable: {e}"),
                };
            }
        };

        match self
            .transport
            .put(&target.address, body, self.config.emergency_timeout())
            .await
        {
            Ok(status_code) => {
                log_reply(status_code, ResponseStatus::Failed);
                DeliveryReport::DeliveredEmergency { status_code }
            }
            Err(e) => {
                error!(
                    error = %e,
                    "Emergency response also failed; the orchestrator will time out"
                );
                DeliveryReport::Undelivered {
                    reason: format!("{failure}; emergency response failed: {e}"),
                }
            }
        }
    }
}

fn log_reply(status_code: u16, status: ResponseStatus) {
    if EXPECTED_STATUS.contains(&status_code) {
        info!(status_code, response = %status, "Response delivered");
    } else {
        warn!(status_code, response = %status, "Unexpected status code from callback target");
    }
}
