//! Error types for the Courier core library
//!
//! The request engine reports every per-call failure as a typed
//! [`NetworkError`](crate::http::NetworkError). This module wraps those, token
//! storage failures and configuration problems into the crate-level [`Error`]
//! returned by the "throwing" entry points such as
//! [`HttpClient::perform`](crate::http::HttpClient::perform).

use thiserror::Error;

use crate::http::{NetworkError, StorageError};

/// Main error type for Courier operations
#[derive(Error, Debug)]
pub enum Error {
    /// A request ended in one of the classified network outcomes
    #[error("Request failed: {0}")]
    Network(#[from] NetworkError),

    /// Token persistence failed
    #[error("Token storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error without an underlying cause
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// The network error behind this failure, if any
    pub fn as_network(&self) -> Option<&NetworkError> {
        match self {
            Error::Network(error) => Some(error),
            _ => None,
        }
    }
}
