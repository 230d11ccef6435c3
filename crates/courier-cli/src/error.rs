//! Error types and handling for the CLI

use std::io;
use std::path::PathBuf;

use courier_core::NetworkError;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for CLI operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error from courier-core
    #[error(transparent)]
    Core(#[from] courier_core::Error),

    /// Configuration file not found
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{message}")]
    Other { message: String },
}

impl From<NetworkError> for Error {
    fn from(error: NetworkError) -> Self {
        Self::Core(error.into())
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a generic error with message
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Get the exit code for this error; clap exits with 2 on usage errors
    pub fn exit_code(&self) -> i32 {
        1
    }

    fn network(&self) -> Option<&NetworkError> {
        match self {
            Self::Core(core) => core.as_network(),
            _ => None,
        }
    }

    /// Follow-up advice for the user, if any
    pub fn hint(&self) -> Option<&'static str> {
        match self.network()? {
            NetworkError::Unauthorized { .. } | NetworkError::AuthenticationFailed { .. } => {
                Some("run `courier login --token <TOKEN>` to store a fresh token")
            }
            NetworkError::NoConnection { .. } | NetworkError::Timeout => {
                Some("check the base URL and your network connection")
            }
            _ => None,
        }
    }
}

/// Format an error for display to the user
pub fn format_error(error: &Error, use_color: bool) -> String {
    let mut message = format!("{}", error);

    // HTTP errors carry the server's own explanation
    if let Some(detail) = error.network().and_then(NetworkError::api_message) {
        if !message.contains(&detail) {
            message = format!("{}: {}", message, detail);
        }
    }

    if use_color {
        use colored::Colorize;
        format!("{} {}", "Error:".red().bold(), message)
    } else {
        format!("Error: {}", message)
    }
}
