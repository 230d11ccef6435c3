//! Request interceptors
//!
//! An [`Interceptor`] gets three chances to take part in a request:
//! - `adapt` rewrites the outgoing request before every attempt
//! - `should_retry` may opt into retrying a failed attempt
//! - `on_success` observes every response that classified as success
//!
//! [`InterceptorChain`] composes several interceptors and is itself an
//! interceptor, so chains nest.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::http::error::{NetworkError, RawResponse};

/// The request type interceptors and routes work with
pub type OutboundRequest = reqwest::Request;

/// Per-attempt view of the request being executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// HTTP method of the route
    pub method: Method,
    /// Fully resolved URL of the route
    pub url: Url,
    /// Zero-based attempt index
    pub attempt: usize,
    /// Attempt budget for this call
    pub max_attempts: usize,
    /// Token store generation applied to this attempt, set during `adapt`
    credential_generation: OnceLock<u64>,
}

impl RequestContext {
    pub fn new(method: Method, url: Url, attempt: usize, max_attempts: usize) -> Self {
        Self {
            method,
            url,
            attempt,
            max_attempts,
            credential_generation: OnceLock::new(),
        }
    }

    /// URL path, handy for filter predicates
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Record which token generation this attempt was sent with; the first
    /// record wins
    pub fn record_credential_generation(&self, generation: u64) {
        let _ = self.credential_generation.set(generation);
    }

    /// Token generation this attempt was sent with, if one was recorded
    pub fn credential_generation(&self) -> Option<u64> {
        self.credential_generation.get().copied()
    }

    /// Whether the budget allows another attempt after this one
    pub fn has_attempts_left(&self) -> bool {
        self.attempt + 1 < self.max_attempts
    }
}

/// Hook into request adaptation, retry decisions and successful responses
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Rewrite the outgoing request; an error aborts the whole call
    async fn adapt(
        &self,
        _ctx: &RequestContext,
        request: OutboundRequest,
        _cancel: &CancellationToken,
    ) -> std::result::Result<OutboundRequest, NetworkError> {
        Ok(request)
    }

    /// Opt into retrying a failed attempt; an error aborts the whole call
    async fn should_retry(
        &self,
        _ctx: &RequestContext,
        _error: &NetworkError,
        _cancel: &CancellationToken,
    ) -> std::result::Result<bool, NetworkError> {
        Ok(false)
    }

    /// Observe a successful response
    async fn on_success(&self, _ctx: &RequestContext, _response: &RawResponse) {}
}

/// Ordered composition of interceptors
///
/// `adapt` and `on_success` run first to last. `should_retry` asks members
/// last to first and stops at the first one that opts in.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor to the end of the chain
    pub fn with(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.push(Arc::new(interceptor));
        self
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

#[async_trait]
impl Interceptor for InterceptorChain {
    async fn adapt(
        &self,
        ctx: &RequestContext,
        mut request: OutboundRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<OutboundRequest, NetworkError> {
        for interceptor in &self.interceptors {
            request = interceptor.adapt(ctx, request, cancel).await?;
        }
        Ok(request)
    }

    async fn should_retry(
        &self,
        ctx: &RequestContext,
        error: &NetworkError,
        cancel: &CancellationToken,
    ) -> std::result::Result<bool, NetworkError> {
        for interceptor in self.interceptors.iter().rev() {
            if interceptor.should_retry(ctx, error, cancel).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn on_success(&self, ctx: &RequestContext, response: &RawResponse) {
        for interceptor in &self.interceptors {
            interceptor.on_success(ctx, response).await;
        }
    }
}

/// Sets a fixed set of headers on every request
///
/// Values may reference environment variables as `${ENV:NAME}`; they are
/// expanded once, at construction.
#[derive(Debug, Clone)]
pub struct HeadersInterceptor {
    headers: HeaderMap,
}

impl HeadersInterceptor {
    /// Build from name/value pairs, expanding `${ENV:NAME}` references
    pub fn new<I, K, V>(headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = name.as_ref();
            let expanded = expand_env_vars(value.as_ref())?;
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::configuration(format!("Invalid header name: {}", name)))?;
            let header_value = HeaderValue::from_str(&expanded).map_err(|_| {
                Error::configuration(format!("Invalid value for header {}", name))
            })?;
            map.insert(header_name, header_value);
        }
        Ok(Self { headers: map })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

#[async_trait]
impl Interceptor for HeadersInterceptor {
    async fn adapt(
        &self,
        _ctx: &RequestContext,
        mut request: OutboundRequest,
        _cancel: &CancellationToken,
    ) -> std::result::Result<OutboundRequest, NetworkError> {
        for (name, value) in &self.headers {
            request.headers_mut().insert(name.clone(), value.clone());
        }
        Ok(request)
    }
}

/// Expand `${ENV:NAME}` references in `value`
pub fn expand_env_vars(value: &str) -> Result<String> {
    let re = Regex::new(r"\$\{ENV:([^}]+)\}")
        .map_err(|e| Error::configuration(format!("Invalid env pattern: {}", e)))?;

    let mut result = value.to_string();
    for cap in re.captures_iter(value) {
        let var_name = &cap[1];
        let env_value = std::env::var(var_name).map_err(|_| {
            Error::configuration(format!("Environment variable {} not found", var_name))
        })?;
        result = result.replace(&cap[0], &env_value);
    }
    Ok(result)
}

/// Emits `tracing` events for requests, failures and completions
///
/// Never opts into a retry.
#[derive(Debug, Clone, Default)]
pub struct LoggingInterceptor {
    log_headers: bool,
}

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log outgoing header names (values are never logged)
    pub fn with_header_names(mut self, enabled: bool) -> Self {
        self.log_headers = enabled;
        self
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn adapt(
        &self,
        ctx: &RequestContext,
        request: OutboundRequest,
        _cancel: &CancellationToken,
    ) -> std::result::Result<OutboundRequest, NetworkError> {
        if self.log_headers {
            let names: Vec<&str> = request.headers().keys().map(|name| name.as_str()).collect();
            info!(
                method = %ctx.method,
                url = %ctx.url,
                attempt = ctx.attempt + 1,
                headers = ?names,
                "sending request"
            );
        } else {
            info!(
                method = %ctx.method,
                url = %ctx.url,
                attempt = ctx.attempt + 1,
                "sending request"
            );
        }
        Ok(request)
    }

    async fn should_retry(
        &self,
        ctx: &RequestContext,
        error: &NetworkError,
        _cancel: &CancellationToken,
    ) -> std::result::Result<bool, NetworkError> {
        info!(
            method = %ctx.method,
            url = %ctx.url,
            attempt = ctx.attempt + 1,
            kind = %error.kind(),
            error = %error,
            "request attempt failed"
        );
        Ok(false)
    }

    async fn on_success(&self, ctx: &RequestContext, response: &RawResponse) {
        debug!(
            method = %ctx.method,
            url = %ctx.url,
            status = response.status.as_u16(),
            bytes = response.body.len(),
            "request completed"
        );
    }
}
