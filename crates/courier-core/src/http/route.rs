//! Routes: how a logical call becomes a request and a response becomes a value
//!
//! [`Route`] is the contract the client drives. [`Endpoint`] is the JSON
//! implementation most callers need: method, path, query, headers, optional
//! JSON body and a typed JSON decode.

use std::error::Error as StdError;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::http::error::{NetworkError, RawResponse, SharedCause};
use crate::http::interceptor::OutboundRequest;

/// A response body did not decode into the route's output
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DecodeError {
    message: String,
    #[source]
    source: Option<SharedCause>,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying decoder error
    pub fn from_source<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(error: serde_json::Error) -> Self {
        Self::from_source(error)
    }
}

/// Describes one endpoint call
pub trait Route: Send + Sync {
    /// Value produced from a successful response
    type Output: Send;

    /// Build the outgoing request relative to `base_url`
    ///
    /// Failure here is a programmer error and is never retried.
    fn build_request(&self, base_url: &Url) -> Result<OutboundRequest, NetworkError>;

    /// Decode a successful response; failure is never retried
    fn decode(&self, response: &RawResponse) -> Result<Self::Output, DecodeError>;
}

/// JSON endpoint decoding into `T`
pub struct Endpoint<T> {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Value>,
    timeout: Option<Duration>,
    _output: PhantomData<fn() -> T>,
}

impl<T> Endpoint<T> {
    /// Endpoint at `path`, resolved relative to the client's base URL
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: None,
            _output: PhantomData,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a request header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send `body` as JSON
    pub fn with_json<B: Serialize>(mut self, body: &B) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Send an already built JSON value
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Per-request timeout, enforced by the transport
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolve the path against `base_url`
    ///
    /// The base is treated as a directory, so `https://host/v1` + `items`
    /// and `https://host/v1/` + `/items` both give `https://host/v1/items`.
    fn resolve(&self, base_url: &Url) -> Result<Url, NetworkError> {
        if self.path.starts_with("http://") || self.path.starts_with("https://") {
            return Url::parse(&self.path).map_err(|e| {
                NetworkError::invalid_route(format!("invalid URL {}: {}", self.path, e))
            });
        }

        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(self.path.trim_start_matches('/')).map_err(|e| {
            NetworkError::invalid_route(format!("failed to join path {}: {}", self.path, e))
        })
    }
}

impl<T> Clone for Endpoint<T> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            timeout: self.timeout,
            _output: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Endpoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("has_body", &self.body.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T> Route for Endpoint<T>
where
    T: DeserializeOwned + Send,
{
    type Output = T;

    fn build_request(&self, base_url: &Url) -> Result<OutboundRequest, NetworkError> {
        let mut url = self.resolve(base_url)?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }

        let mut request = reqwest::Request::new(self.method.clone(), url);
        let headers = request.headers_mut();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                NetworkError::invalid_route(format!("invalid header name: {}", name))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|_| {
                NetworkError::invalid_route(format!("invalid value for header {}", name))
            })?;
            headers.insert(header_name, header_value);
        }

        if let Some(body) = &self.body {
            let bytes = serde_json::to_vec(body).map_err(|e| {
                NetworkError::invalid_route(format!("failed to encode request body: {}", e))
            })?;
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            *request.body_mut() = Some(bytes.into());
        }

        if let Some(timeout) = self.timeout {
            *request.timeout_mut() = Some(timeout);
        }

        Ok(request)
    }

    fn decode(&self, response: &RawResponse) -> Result<T, DecodeError> {
        // empty bodies (204, HEAD) decode like JSON null so `()` and Option work
        let body: &[u8] = if response.body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &response.body
        };
        Ok(serde_json::from_slice(body)?)
    }
}
