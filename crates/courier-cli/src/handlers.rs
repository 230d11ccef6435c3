//! Command handlers for CLI subcommands
//!
//! This module contains the implementation logic for each CLI subcommand.

mod auth;
mod config;
mod get;

pub use auth::{handle_login, handle_logout};
pub use config::handle_config;
pub use get::handle_get;

use crate::config::Config;
use crate::error::Result;
use courier_core::http::StorageError;
use courier_core::{
    AuthenticationInterceptor, BearerToken, FileStore, HttpClient, HttpClientBuilder,
    LoggingInterceptor, TokenStore,
};
use std::sync::Arc;

/// Token store backed by one file per key under the configured directory
fn token_store(config: &Config) -> Arc<TokenStore<BearerToken>> {
    Arc::new(TokenStore::with_error_callback(
        Arc::new(FileStore::new(&config.token_dir)),
        config.client.auth.token_key.clone(),
        |error: &StorageError| {
            tracing::warn!(key = error.key(), error = %error, "Token storage failed");
        },
    ))
}

/// The CLI has no way to obtain new credentials on its own
async fn refresh_unavailable(_current: Option<BearerToken>) -> anyhow::Result<BearerToken> {
    anyhow::bail!("the stored token was rejected or has expired and cannot be refreshed")
}

/// Build a client from the effective settings, authenticating with the
/// stored token
fn build_client(config: &Config) -> Result<HttpClient> {
    config.client.validate()?;

    let auth = config
        .client
        .auth
        .configure(AuthenticationInterceptor::new(
            token_store(config),
            refresh_unavailable,
        ));

    let client = HttpClientBuilder::from_settings(&config.client)?
        .interceptor(LoggingInterceptor::new())
        .interceptor(auth)
        .build()?;
    Ok(client)
}
