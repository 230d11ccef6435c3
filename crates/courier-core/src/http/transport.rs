//! Transports: sending a built request and buffering the response
//!
//! The client only depends on the [`Transport`] trait. [`ReqwestTransport`]
//! is the default implementation; tests substitute scripted transports.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::error::{Error, Result};
use crate::http::error::{RawResponse, SharedCause};
use crate::http::interceptor::OutboundRequest;

/// Failure before a complete response was received
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {message}")]
    Connect { message: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<SharedCause>,
    },
}

impl TransportError {
    pub fn other<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Other {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout
        } else if error.is_connect() {
            TransportError::Connect {
                message: error.to_string(),
            }
        } else {
            TransportError::other(error)
        }
    }
}

/// Receives download progress for a single call
pub trait TransferObserver: Send + Sync {
    /// `received` bytes so far out of `total` when the length is known
    fn on_progress(&self, received: u64, total: Option<u64>);
}

impl<F> TransferObserver for F
where
    F: Fn(u64, Option<u64>) + Send + Sync,
{
    fn on_progress(&self, received: u64, total: Option<u64>) {
        self(received, total)
    }
}

/// Sends requests and returns fully buffered responses
///
/// Any HTTP status is a successful send; classification happens in the
/// client.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: OutboundRequest,
        observer: Option<Arc<dyn TransferObserver>>,
    ) -> std::result::Result<RawResponse, TransportError>;
}

/// Timeout configuration for HTTP requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connection timeout - time to establish a connection
    #[serde(rename = "connect_timeout_ms", with = "crate::util::duration_ms")]
    pub connect_timeout: Duration,
    /// Request timeout - total time for the entire request
    #[serde(rename = "request_timeout_ms", with = "crate::util::duration_ms")]
    pub request_timeout: Duration,
    /// Keep-alive timeout for idle pooled connections
    #[serde(
        rename = "pool_idle_timeout_ms",
        default,
        with = "crate::util::option_duration_ms"
    )]
    pub pool_idle_timeout: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            pool_idle_timeout: Some(Duration::from_secs(90)),
        }
    }
}

impl TimeoutConfig {
    /// Create a fast timeout configuration (for testing/development)
    pub fn fast() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            pool_idle_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Create a slow timeout configuration (for large downloads)
    pub fn slow() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(300),
            pool_idle_timeout: Some(Duration::from_secs(300)),
        }
    }

    /// Validate timeout configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout cannot be zero".to_string());
        }

        if self.request_timeout.is_zero() {
            return Err("Request timeout cannot be zero".to_string());
        }

        if self.request_timeout < self.connect_timeout {
            return Err("Request timeout should be >= connect timeout".to_string());
        }

        Ok(())
    }
}

/// [`Transport`] backed by a pooled `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeouts: TimeoutConfig,
}

impl ReqwestTransport {
    /// Build a transport with the given timeouts
    pub fn new(timeouts: TimeoutConfig) -> Result<Self> {
        timeouts.validate().map_err(Error::configuration)?;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(timeouts.connect_timeout)
            .timeout(timeouts.request_timeout)
            .user_agent(concat!("courier/", env!("CARGO_PKG_VERSION")));
        if let Some(idle) = timeouts.pool_idle_timeout {
            builder = builder.pool_idle_timeout(idle);
        }

        let client = builder.build().map_err(|e| Error::Configuration {
            message: "Failed to create HTTP client".to_string(),
            source: Some(e.into()),
        })?;

        Ok(Self { client, timeouts })
    }

    /// Wrap an existing client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeouts: TimeoutConfig::default(),
        }
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: OutboundRequest,
        observer: Option<Arc<dyn TransferObserver>>,
    ) -> std::result::Result<RawResponse, TransportError> {
        let mut response = self.client.execute(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let total = response.content_length();

        let mut body = BytesMut::with_capacity(total.unwrap_or(0).min(1 << 20) as usize);
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if let Some(observer) = &observer {
                observer.on_progress(body.len() as u64, total);
            }
        }
        trace!(status = status.as_u16(), bytes = body.len(), "response received");

        Ok(RawResponse {
            status,
            headers,
            body: body.freeze(),
        })
    }
}
