//! Courier Core - request execution engine for HTTP clients
//!
//! Turns a logical "call this endpoint" into a completed outcome that has
//! been rate limited, authenticated and retried as configured.
//!
//! # Main Components
//!
//! - **Error Handling**: a closed [`NetworkError`] taxonomy per call, wrapped
//!   in the crate [`Error`] by the throwing entry points
//! - **Retry**: pure [`RetryPolicy`] with exponential backoff and jitter
//! - **Rate Limiting**: sliding window [`RateLimiter`] shared by all calls
//! - **Authentication**: [`TokenStore`] with deduplicated refresh and the
//!   [`AuthenticationInterceptor`]
//! - **Client**: [`HttpClient`] driving a [`Route`] through a [`Transport`]
//!
//! # Example
//!
//! ```no_run
//! use courier_core::{Endpoint, HttpClient, RateLimit, Result, RetryPolicy};
//!
//! #[derive(serde::Deserialize)]
//! struct User {
//!     login: String,
//! }
//!
//! async fn example() -> Result<()> {
//!     let client = HttpClient::builder("https://api.example.com")
//!         .retry_policy(RetryPolicy::aggressive())
//!         .rate_limit(RateLimit::per_second(5))
//!         .build()?;
//!
//!     let user: User = client.perform(&Endpoint::get("users/octocat")).await?;
//!     println!("{}", user.login);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http;
mod util;

pub use config::{AuthSettings, ClientSettings};
pub use error::{Error, Result};
pub use http::{
    AuthenticationInterceptor, BearerToken, CallOptions, DurableStore, Endpoint, ErrorKind,
    FileStore, HeaderToken, HeadersInterceptor, HttpClient, HttpClientBuilder, Interceptor,
    InterceptorChain, LoggingInterceptor, MemoryStore, NetworkError, RateLimit, RateLimiter,
    RawResponse, RequestContext, RetryPolicy, Route, StorageError, TimeoutConfig, Token,
    TokenRefresher, TokenStore, Transport,
};

/// Version of the Courier core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
