//! Authentication tokens and the authentication interceptor
//!
//! Supports:
//! - Bearer tokens with optional refresh token and expiry
//! - API keys in arbitrary headers
//! - Any caller-defined scheme implementing [`Token`]
//!
//! [`AuthenticationInterceptor`] applies the current token to matching
//! requests and, on a 401, refreshes it through the shared [`TokenStore`] so
//! concurrent failures trigger one refresh.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::http::error::{NetworkError, RawResponse};
use crate::http::interceptor::{Interceptor, OutboundRequest, RequestContext};
use crate::http::token_store::{Renewal, TokenStore};

/// A credential the engine can attach to requests and persist
pub trait Token: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Attach this credential to an outgoing request
    fn apply(&self, request: &mut OutboundRequest) -> Result<(), NetworkError>;

    /// Whether the credential is known to be expired without asking the server
    fn is_expired(&self) -> bool {
        false
    }
}

/// OAuth-style bearer token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl BearerToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Expire `lifetime` from now
    pub fn expires_in(self, lifetime: Duration) -> Self {
        let expires_at = chrono::Duration::from_std(lifetime)
            .ok()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.with_expiry(expires_at)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Token for BearerToken {
    fn apply(&self, request: &mut OutboundRequest) -> Result<(), NetworkError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.access_token))
            .map_err(|_| NetworkError::invalid_route("access token is not a valid header value"))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// API key sent in a named header (`x-api-key: ...`)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderToken {
    pub header: String,
    pub value: String,
}

impl HeaderToken {
    pub fn new(header: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            value: value.into(),
        }
    }
}

impl fmt::Debug for HeaderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderToken")
            .field("header", &self.header)
            .field("value", &"<redacted>")
            .finish()
    }
}

impl Token for HeaderToken {
    fn apply(&self, request: &mut OutboundRequest) -> Result<(), NetworkError> {
        let name = HeaderName::from_bytes(self.header.as_bytes()).map_err(|_| {
            NetworkError::invalid_route(format!("invalid auth header name: {}", self.header))
        })?;
        let mut value = HeaderValue::from_str(&self.value)
            .map_err(|_| NetworkError::invalid_route("API key is not a valid header value"))?;
        value.set_sensitive(true);
        request.headers_mut().insert(name, value);
        Ok(())
    }
}

/// Obtains a new token, given the current one (if any)
///
/// Implemented for async closures `Fn(Option<T>) -> impl Future<Output =
/// anyhow::Result<T>>`.
#[async_trait]
pub trait TokenRefresher<T: Token>: Send + Sync {
    async fn refresh(&self, current: Option<T>) -> anyhow::Result<T>;
}

#[async_trait]
impl<T, F, Fut> TokenRefresher<T> for F
where
    T: Token,
    F: Fn(Option<T>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send,
{
    async fn refresh(&self, current: Option<T>) -> anyhow::Result<T> {
        (self)(current).await
    }
}

/// Predicate selecting which requests get authenticated
pub type RequestFilter = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Default cap on consecutive 401 retries
pub const DEFAULT_MAX_UNAUTHORIZED_ATTEMPTS: usize = 1;

/// Applies tokens to requests and refreshes them on 401
pub struct AuthenticationInterceptor<T: Token> {
    store: Arc<TokenStore<T>>,
    refresher: Arc<dyn TokenRefresher<T>>,
    filter: RequestFilter,
    max_unauthorized_attempts: usize,
    refresh_backoff: Option<Duration>,
    /// Consecutive unauthorized outcomes seen by this instance
    unauthorized_streak: AtomicUsize,
}

impl<T: Token> AuthenticationInterceptor<T> {
    /// Authenticate every request, allowing one refresh per 401 streak
    pub fn new(store: Arc<TokenStore<T>>, refresher: impl TokenRefresher<T> + 'static) -> Self {
        Self {
            store,
            refresher: Arc::new(refresher),
            filter: Arc::new(|_: &RequestContext| true),
            max_unauthorized_attempts: DEFAULT_MAX_UNAUTHORIZED_ATTEMPTS,
            refresh_backoff: None,
            unauthorized_streak: AtomicUsize::new(0),
        }
    }

    /// Only authenticate requests matching `filter`
    pub fn with_filter(
        mut self,
        filter: impl Fn(&RequestContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    /// Only authenticate requests whose path starts with `prefix`
    pub fn with_path_prefix(self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.with_filter(move |ctx| ctx.path().starts_with(&prefix))
    }

    /// Refresh-and-retry at most `attempts` times in a row
    pub fn with_max_unauthorized_attempts(mut self, attempts: usize) -> Self {
        self.max_unauthorized_attempts = attempts;
        self
    }

    /// Wait `delay` before each refresh triggered by a 401
    pub fn with_refresh_backoff(mut self, delay: Duration) -> Self {
        self.refresh_backoff = Some(delay);
        self
    }

    pub fn store(&self) -> &Arc<TokenStore<T>> {
        &self.store
    }

    /// Current consecutive 401 count
    pub fn unauthorized_streak(&self) -> usize {
        self.unauthorized_streak.load(Ordering::SeqCst)
    }

    fn reset_streak(&self) {
        self.unauthorized_streak.store(0, Ordering::SeqCst);
    }

    /// Count one more unauthorized outcome unless the cap is reached
    fn admit_refresh(&self) -> bool {
        let max = self.max_unauthorized_attempts;
        self.unauthorized_streak
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |streak| {
                (streak < max).then_some(streak + 1)
            })
            .is_ok()
    }

    async fn renew(
        &self,
        seen: u64,
        pause: Option<Duration>,
        admit: impl FnOnce() -> bool,
        cancel: &CancellationToken,
    ) -> Result<Renewal<T>, NetworkError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NetworkError::Cancelled),
            outcome = self.store.renew(seen, self.refresher.as_ref(), pause, admit) => {
                outcome.map_err(|err| NetworkError::AuthenticationFailed { message: err.message })
            }
        }
    }
}

impl<T: Token> fmt::Debug for AuthenticationInterceptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationInterceptor")
            .field("store", &self.store)
            .field("max_unauthorized_attempts", &self.max_unauthorized_attempts)
            .field("refresh_backoff", &self.refresh_backoff)
            .field("unauthorized_streak", &self.unauthorized_streak())
            .finish()
    }
}

#[async_trait]
impl<T: Token> Interceptor for AuthenticationInterceptor<T> {
    async fn adapt(
        &self,
        ctx: &RequestContext,
        mut request: OutboundRequest,
        cancel: &CancellationToken,
    ) -> Result<OutboundRequest, NetworkError> {
        if !(self.filter)(ctx) {
            return Ok(request);
        }

        let (mut token, mut generation) = self.store.snapshot();
        if token.as_ref().is_some_and(T::is_expired) {
            debug!(url = %ctx.url, "cached token expired, refreshing before send");
            match self.renew(generation, None, || true, cancel).await? {
                Renewal::Refreshed {
                    token: fresh,
                    generation: fresh_generation,
                    ..
                } => {
                    token = Some(fresh);
                    generation = fresh_generation;
                }
                Renewal::Superseded | Renewal::Declined => {
                    (token, generation) = self.store.snapshot();
                }
            }
        }

        ctx.record_credential_generation(generation);
        if let Some(token) = token {
            token.apply(&mut request)?;
        }
        Ok(request)
    }

    async fn should_retry(
        &self,
        ctx: &RequestContext,
        error: &NetworkError,
        cancel: &CancellationToken,
    ) -> Result<bool, NetworkError> {
        if !(self.filter)(ctx) {
            return Ok(false);
        }
        if !error.is_unauthorized() {
            self.reset_streak();
            return Ok(false);
        }

        let seen = ctx
            .credential_generation()
            .unwrap_or_else(|| self.store.generation());
        let renewal = self
            .renew(seen, self.refresh_backoff, || self.admit_refresh(), cancel)
            .await?;

        match renewal {
            Renewal::Refreshed { initiated, .. } => {
                debug!(
                    url = %ctx.url,
                    initiated,
                    streak = self.unauthorized_streak(),
                    "unauthorized response, token refreshed"
                );
                Ok(true)
            }
            Renewal::Superseded => {
                debug!(url = %ctx.url, "token was replaced since this attempt, retrying");
                Ok(true)
            }
            Renewal::Declined => {
                warn!(
                    url = %ctx.url,
                    max = self.max_unauthorized_attempts,
                    "giving up after repeated unauthorized responses"
                );
                Ok(false)
            }
        }
    }

    async fn on_success(&self, ctx: &RequestContext, _response: &RawResponse) {
        if (self.filter)(ctx) {
            self.reset_streak();
        }
    }
}
