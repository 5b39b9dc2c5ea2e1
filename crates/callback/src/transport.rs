//! Transports that carry a serialized response to the callback address.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use rekon_core::{Error, Result};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::envelope::ResponseEnvelope;

/// Why a PUT did not reach the callback target.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("connection to {address} failed")]
    Connect { address: String },

    #[error("network error: {message}")]
    Network { message: String },
}

impl TransportError {
    fn from_reqwest(error: &reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                seconds: timeout.as_secs(),
            }
        } else if error.is_connect() {
            Self::Connect {
                address: error
                    .url()
                    .map_or_else(|| "callback address".to_string(), Url::to_string),
            }
        } else {
            Self::Network {
                message: error.to_string(),
            }
        }
    }
}

/// One PUT of a response body.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    /// Send `body` and return the HTTP status code of the reply.
    async fn put(
        &self,
        address: &Url,
        body: String,
        timeout: Duration,
    ) -> std::result::Result<u16, TransportError>;
}

/// PUT over HTTP(S) with an empty content type and explicit content length.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns `Delivery` if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::delivery(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackTransport for HttpTransport {
    async fn put(
        &self,
        address: &Url,
        body: String,
        timeout: Duration,
    ) -> std::result::Result<u16, TransportError> {
        let length = body.len();
        let host = address.host_str().unwrap_or_default();
        debug!(address = %host, bytes = length, "Sending callback");
        let response = self
            .client
            .put(address.clone())
            .header(CONTENT_TYPE, "")
            .header(CONTENT_LENGTH, length)
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e, timeout))?;
        Ok(response.status().as_u16())
    }
}

/// A PUT captured by [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPut {
    pub address: Url,
    pub body: String,
    pub timeout: Duration,
}

impl RecordedPut {
    /// Parse the captured body back into an envelope.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the body is not an envelope.
    pub fn envelope(&self) -> serde_json::Result<ResponseEnvelope> {
        serde_json::from_str(&self.body)
    }
}

/// Transport that records every PUT and answers from a script.
///
/// Unscripted PUTs answer 200.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<RecordedPut>>,
    replies: Mutex<VecDeque<std::result::Result<u16, TransportError>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies for the next PUTs, in order.
    pub async fn script(&self, replies: Vec<std::result::Result<u16, TransportError>>) {
        self.replies.lock().await.extend(replies);
    }

    pub async fn requests(&self) -> Vec<RecordedPut> {
        self.sent.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl CallbackTransport for MemoryTransport {
    async fn put(
        &self,
        address: &Url,
        body: String,
        timeout: Duration,
    ) -> std::result::Result<u16, TransportError> {
        self.sent.lock().await.push(RecordedPut {
            address: address.clone(),
            body,
            timeout,
        });
        self.replies.lock().await.pop_front().unwrap_or(Ok(200))
    }
}
