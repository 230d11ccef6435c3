//! HTTP client: drives one logical request to completion
//!
//! Each call loops over its attempt budget:
//! 1. wait for a rate limit permit
//! 2. build the request from the route
//! 3. let interceptors adapt it
//! 4. send it and classify the outcome
//! 5. on failure ask interceptors, then the classifier, whether to retry
//!
//! A client is cheap to clone; clones share the rate limiter, interceptors
//! and transport.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;

use crate::config::ClientSettings;
use crate::error::{Error, Result};
use crate::http::classifier::ErrorClassifier;
use crate::http::error::NetworkError;
use crate::http::interceptor::{
    HeadersInterceptor, Interceptor, InterceptorChain, OutboundRequest, RequestContext,
};
use crate::http::rate_limit::{RateLimit, RateLimiter};
use crate::http::retry::RetryPolicy;
use crate::http::route::Route;
use crate::http::transport::{ReqwestTransport, TimeoutConfig, TransferObserver, Transport};

/// Per-call options
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Cancels the call at its next suspension point
    pub cancel: Option<CancellationToken>,
    /// Receives download progress
    pub observer: Option<Arc<dyn TransferObserver>>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_observer(mut self, observer: impl TransferObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("cancel", &self.cancel)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Outcome of a single attempt
enum Attempt<T> {
    Success(T),
    /// Eligible for the retry decision
    Failed(NetworkError),
    /// Ends the call immediately
    Abort(NetworkError),
}

struct ClientInner {
    base_url: Url,
    transport: Arc<dyn Transport>,
    retry_policy: Option<RetryPolicy>,
    attempts: usize,
    rate_limiter: Option<Arc<RateLimiter>>,
    interceptors: InterceptorChain,
}

/// Request execution engine
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl HttpClient {
    /// Start building a client for `base_url`
    pub fn builder(base_url: impl Into<String>) -> HttpClientBuilder {
        HttpClientBuilder::new(base_url)
    }

    /// Client with default transport and retry policy
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::builder(base_url).build()
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Attempt budget per call; the retry policy wins over a flat count
    pub fn max_attempts(&self) -> usize {
        match &self.inner.retry_policy {
            Some(policy) => policy.max_attempts.max(1),
            None => self.inner.attempts.max(1),
        }
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.inner.retry_policy.as_ref()
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.inner.rate_limiter.as_ref()
    }

    /// Perform `route`, wrapping failures in the crate [`Error`]
    pub async fn perform<R>(&self, route: &R) -> Result<R::Output>
    where
        R: Route + ?Sized,
    {
        self.perform_with(route, CallOptions::default()).await
    }

    /// [`HttpClient::perform`] with per-call options
    pub async fn perform_with<R>(&self, route: &R, options: CallOptions) -> Result<R::Output>
    where
        R: Route + ?Sized,
    {
        self.request(route, options).await.map_err(Error::from)
    }

    /// Perform `route`, returning the typed network error on failure
    pub async fn request<R>(
        &self,
        route: &R,
        options: CallOptions,
    ) -> std::result::Result<R::Output, NetworkError>
    where
        R: Route + ?Sized,
    {
        let cancel = options.cancel.unwrap_or_default();
        let observer = options.observer;
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            if let Some(limiter) = &self.inner.rate_limiter {
                limiter.acquire(Some(&cancel)).await?;
            }

            let request = route.build_request(&self.inner.base_url)?;
            let ctx = RequestContext::new(
                request.method().clone(),
                request.url().clone(),
                attempt,
                max_attempts,
            );
            let span = info_span!(
                "courier.request",
                method = %ctx.method,
                url = %ctx.url,
                attempt = attempt + 1,
                max_attempts,
            );

            let error = match self
                .attempt(route, &ctx, request, &cancel, observer.clone())
                .instrument(span.clone())
                .await
            {
                Attempt::Success(value) => return Ok(value),
                Attempt::Abort(error) => return Err(error),
                Attempt::Failed(error) => error,
            };

            if !ctx.has_attempts_left() {
                span.in_scope(|| debug!(kind = %error.kind(), "attempt budget exhausted"));
                return Err(error);
            }

            let interceptor_retry = self
                .inner
                .interceptors
                .should_retry(&ctx, &error, &cancel)
                .instrument(span.clone())
                .await?;

            let delay = if interceptor_retry {
                // the interceptor already did its own waiting (refresh, backoff)
                Duration::ZERO
            } else if ErrorClassifier::is_retryable(&error) {
                self.backoff(attempt)
            } else {
                span.in_scope(|| debug!(kind = %error.kind(), "error is not retryable"));
                return Err(error);
            };

            span.in_scope(|| {
                warn!(
                    kind = %error.kind(),
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "request failed, retrying"
                )
            });

            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(NetworkError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            attempt += 1;
        }
    }

    async fn attempt<R>(
        &self,
        route: &R,
        ctx: &RequestContext,
        request: OutboundRequest,
        cancel: &CancellationToken,
        observer: Option<Arc<dyn TransferObserver>>,
    ) -> Attempt<R::Output>
    where
        R: Route + ?Sized,
    {
        let request = match self.inner.interceptors.adapt(ctx, request, cancel).await {
            Ok(request) => request,
            Err(error) => return Attempt::Abort(error),
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Attempt::Abort(NetworkError::Cancelled),
            sent = self.inner.transport.send(request, observer) => sent,
        };

        let response = match sent {
            Ok(response) => response,
            Err(error) => {
                let error = ErrorClassifier::classify_transport(error);
                return if error.is_cancelled() {
                    Attempt::Abort(error)
                } else {
                    Attempt::Failed(error)
                };
            }
        };

        let response = match ErrorClassifier::classify_response(response) {
            Ok(response) => response,
            Err(error) => return Attempt::Failed(error),
        };

        self.inner.interceptors.on_success(ctx, &response).await;
        debug!(status = response.status.as_u16(), "request completed");

        match route.decode(&response) {
            Ok(value) => Attempt::Success(value),
            Err(error) => Attempt::Abort(NetworkError::ParsingError {
                body: response.body.clone(),
                source: Arc::new(error),
            }),
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        match &self.inner.retry_policy {
            Some(policy) => policy.delay(attempt),
            None => Duration::ZERO,
        }
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("max_attempts", &self.max_attempts())
            .field("retry_policy", &self.inner.retry_policy)
            .field("rate_limiter", &self.inner.rate_limiter)
            .field("interceptors", &self.inner.interceptors)
            .finish()
    }
}

/// Builder for [`HttpClient`]
pub struct HttpClientBuilder {
    base_url: String,
    transport: Option<Arc<dyn Transport>>,
    timeouts: TimeoutConfig,
    retry_policy: Option<RetryPolicy>,
    attempts: usize,
    rate_limiter: Option<Arc<RateLimiter>>,
    interceptors: InterceptorChain,
}

impl HttpClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            transport: None,
            timeouts: TimeoutConfig::default(),
            retry_policy: Some(RetryPolicy::default()),
            attempts: 1,
            rate_limiter: None,
            interceptors: InterceptorChain::new(),
        }
    }

    /// Seed a builder from loaded settings
    pub fn from_settings(settings: &ClientSettings) -> Result<Self> {
        let base_url = settings
            .base_url
            .clone()
            .ok_or_else(|| Error::configuration("base_url is required"))?;

        let mut builder = Self::new(base_url).timeouts(settings.timeouts.clone());
        builder.retry_policy = settings.retry.clone();
        if builder.retry_policy.is_none() {
            match settings.max_attempts {
                Some(attempts) => builder.attempts = attempts.max(1),
                None => builder.retry_policy = Some(RetryPolicy::default()),
            }
        }
        if let Some(limit) = settings.rate_limit {
            builder = builder.rate_limit(limit);
        }
        if !settings.headers.is_empty() {
            builder = builder.interceptor(HeadersInterceptor::new(settings.headers.iter())?);
        }
        Ok(builder)
    }

    /// Use a custom transport
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Timeouts for the default transport
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Retry with exponential backoff; takes precedence over a flat count
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Flat attempt count with immediate retries; drops any retry policy
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self.retry_policy = None;
        self
    }

    /// Throttle all calls through this client
    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limiter = Some(Arc::new(RateLimiter::new(limit)));
        self
    }

    /// Share a limiter with other clients
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Append an interceptor
    pub fn interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn shared_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let base_url = Url::parse(&self.base_url).map_err(|e| Error::Configuration {
            message: format!("Invalid base URL: {}", self.base_url),
            source: Some(e.into()),
        })?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.timeouts)?),
        };

        Ok(HttpClient {
            inner: Arc::new(ClientInner {
                base_url,
                transport,
                retry_policy: self.retry_policy,
                attempts: self.attempts,
                rate_limiter: self.rate_limiter,
                interceptors: self.interceptors,
            }),
        })
    }
}
