//! Request execution engine
//!
//! This module provides:
//! - Error classification into a closed [`NetworkError`] taxonomy
//! - Retry policies with exponential backoff and jitter
//! - Sliding window rate limiting
//! - Token storage with deduplicated refresh
//! - Interceptors for authentication, static headers and logging
//! - The [`HttpClient`] that drives a [`Route`] through a [`Transport`]

pub mod auth;
pub mod classifier;
pub mod client;
pub mod error;
pub mod interceptor;
pub mod rate_limit;
pub mod retry;
pub mod route;
pub mod storage;
pub mod token_store;
pub mod transport;

pub use auth::{
    AuthenticationInterceptor, BearerToken, HeaderToken, RequestFilter, Token, TokenRefresher,
};
pub use classifier::{ErrorClassifier, ErrorKind};
pub use client::{CallOptions, HttpClient, HttpClientBuilder};
pub use error::{NetworkError, RawResponse};
pub use interceptor::{
    HeadersInterceptor, Interceptor, InterceptorChain, LoggingInterceptor, OutboundRequest,
    RequestContext,
};
pub use rate_limit::{RateLimit, RateLimitError, RateLimiter};
pub use retry::{RetryDecision, RetryPolicy, RetryPreset};
pub use route::{DecodeError, Endpoint, Route};
pub use storage::{DurableStore, FileStore, MemoryStore, StorageError};
pub use token_store::{RefreshError, Renewal, TokenStore};
pub use transport::{ReqwestTransport, TimeoutConfig, TransferObserver, Transport, TransportError};

// Re-export commonly used types
pub use reqwest::{Method, StatusCode};
