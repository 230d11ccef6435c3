//! Network error taxonomy
//!
//! Every call through [`HttpClient`](crate::http::HttpClient) ends in either a
//! decoded value or exactly one [`NetworkError`]. HTTP-level variants keep the
//! raw response around so callers can decode a structured API error body
//! themselves.

use std::error::Error as StdError;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::http::classifier::ErrorKind;

/// Shared, cloneable error cause
pub type SharedCause = Arc<dyn StdError + Send + Sync>;

/// A fully buffered response as returned by a transport
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw response body
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Body as lossy UTF-8, for diagnostics
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Closed set of outcomes a request can fail with
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    /// The route could not produce a request (programmer error)
    #[error("invalid route: {message}")]
    InvalidRoute { message: String },

    /// The response body could not be decoded into the expected shape
    #[error("failed to decode response body: {source}")]
    ParsingError {
        body: Bytes,
        #[source]
        source: SharedCause,
    },

    /// The transport gave up waiting for the server
    #[error("request timed out")]
    Timeout,

    /// The server could not be reached
    #[error("no connection: {message}")]
    NoConnection { message: String },

    /// The caller cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// The server answered 401
    #[error("unauthorized (401)")]
    Unauthorized { response: Option<RawResponse> },

    /// Any other 4xx answer
    #[error("client error ({status})")]
    ClientError {
        status: u16,
        response: Option<RawResponse>,
    },

    /// A 5xx answer
    #[error("server error ({status})")]
    ServerError {
        status: u16,
        response: Option<RawResponse>,
    },

    /// Refreshing credentials after a 401 failed
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Anything the classifier could not place
    #[error("unknown error: {message}")]
    Unknown {
        message: String,
        #[source]
        source: Option<SharedCause>,
    },
}

impl NetworkError {
    /// Create an invalid route error
    pub fn invalid_route(message: impl Into<String>) -> Self {
        Self::InvalidRoute {
            message: message.into(),
        }
    }

    /// Create an unknown error from any cause
    pub fn unknown<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Unknown {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }

    /// Fieldless kind of this error, used for retry eligibility and logging
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRoute { .. } => ErrorKind::InvalidRoute,
            Self::ParsingError { .. } => ErrorKind::Parsing,
            Self::Timeout => ErrorKind::Timeout,
            Self::NoConnection { .. } => ErrorKind::NoConnection,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::ClientError { .. } => ErrorKind::ClientError,
            Self::ServerError { .. } => ErrorKind::ServerError,
            Self::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// HTTP status code, when the error came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED.as_u16()),
            Self::ClientError { status, .. } | Self::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The response that produced this error, if one was received
    pub fn response(&self) -> Option<&RawResponse> {
        match self {
            Self::Unauthorized { response }
            | Self::ClientError { response, .. }
            | Self::ServerError { response, .. } => response.as_ref(),
            _ => None,
        }
    }

    /// Raw body bytes attached to this error
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::ParsingError { body, .. } => Some(body),
            _ => self.response().map(|response| &response.body),
        }
    }

    /// Decode the attached body as a caller-defined API error type
    pub fn decode_body<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.body().map(|body| serde_json::from_slice(body))
    }

    /// Best-effort human readable message from a JSON error body
    ///
    /// Understands `{"error": {"message": ..}}`, `{"error": ".."}` and
    /// `{"message": ..}`; falls back to the raw body text.
    pub fn api_message(&self) -> Option<String> {
        let body = self.body()?;
        let fallback = || String::from_utf8_lossy(body).into_owned();
        let Ok(json) = serde_json::from_slice::<Value>(body) else {
            return Some(fallback());
        };

        if let Some(error) = json.get("error") {
            if let Some(message) = error.get("message").and_then(Value::as_str) {
                return Some(message.to_string());
            }
            if let Some(message) = error.as_str() {
                return Some(message.to_string());
            }
        }
        if let Some(message) = json.get("message").and_then(Value::as_str) {
            return Some(message.to_string());
        }

        Some(fallback())
    }
}
