//! Error classification
//!
//! Maps transport outcomes and HTTP status codes onto the closed
//! [`NetworkError`] taxonomy and decides which kinds of error are worth
//! retrying by default.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::http::error::{NetworkError, RawResponse};
use crate::http::transport::TransportError;

/// Fieldless kind of a [`NetworkError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Route could not build a request
    InvalidRoute,
    /// Body did not decode
    Parsing,
    /// Transport timed out - should retry
    Timeout,
    /// Server unreachable - should retry
    NoConnection,
    /// Caller cancelled - terminal
    Cancelled,
    /// 401 - retried only when an interceptor opts in
    Unauthorized,
    /// Other 4xx - should not retry
    ClientError,
    /// 5xx - should retry
    ServerError,
    /// Credential refresh failed - terminal
    AuthenticationFailed,
    /// Unknown errors - default to no retry
    Unknown,
}

impl ErrorKind {
    /// Whether this kind is retried without any interceptor opting in
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::NoConnection | ErrorKind::ServerError
        )
    }

    /// Stable name used in log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRoute => "invalid_route",
            ErrorKind::Parsing => "parsing",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NoConnection => "no_connection",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::ClientError => "client_error",
            ErrorKind::ServerError => "server_error",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateless classifier shared by the request loop
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a received response
    ///
    /// 2xx passes through, 401 is unauthorized, other 4xx are client errors,
    /// 5xx are server errors and everything else (1xx, 3xx) is unknown.
    pub fn classify_response(response: RawResponse) -> Result<RawResponse, NetworkError> {
        let status = response.status;
        match status.as_u16() {
            200..=299 => Ok(response),
            401 => Err(NetworkError::Unauthorized {
                response: Some(response),
            }),
            400..=499 => Err(NetworkError::ClientError {
                status: status.as_u16(),
                response: Some(response),
            }),
            500..=599 => Err(NetworkError::ServerError {
                status: status.as_u16(),
                response: Some(response),
            }),
            _ => Err(NetworkError::Unknown {
                message: format!("unexpected status {}", describe(status)),
                source: None,
            }),
        }
    }

    /// Classify a failure that happened before any response arrived
    pub fn classify_transport(error: TransportError) -> NetworkError {
        match error {
            TransportError::Timeout => NetworkError::Timeout,
            TransportError::Connect { message } => NetworkError::NoConnection { message },
            TransportError::Cancelled => NetworkError::Cancelled,
            TransportError::Other { message, source } => NetworkError::Unknown { message, source },
        }
    }

    /// Default retry eligibility for an error
    pub fn is_retryable(error: &NetworkError) -> bool {
        error.kind().is_retryable()
    }
}

fn describe(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;

    fn response(status: u16) -> RawResponse {
        RawResponse::new(StatusCode::from_u16(status).unwrap(), HeaderMap::new(), "")
    }

    #[test]
    fn test_status_mapping() {
        assert!(ErrorClassifier::classify_response(response(200)).is_ok());
        assert!(ErrorClassifier::classify_response(response(204)).is_ok());

        let kind = |status| {
            ErrorClassifier::classify_response(response(status))
                .unwrap_err()
                .kind()
        };
        assert_eq!(kind(401), ErrorKind::Unauthorized);
        assert_eq!(kind(400), ErrorKind::ClientError);
        assert_eq!(kind(403), ErrorKind::ClientError);
        assert_eq!(kind(429), ErrorKind::ClientError);
        assert_eq!(kind(500), ErrorKind::ServerError);
        assert_eq!(kind(503), ErrorKind::ServerError);
        assert_eq!(kind(304), ErrorKind::Unknown);
        assert_eq!(kind(101), ErrorKind::Unknown);
    }

    #[test]
    fn test_http_errors_keep_response() {
        let err = ErrorClassifier::classify_response(response(404)).unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(err.response().is_some());
    }

    #[test]
    fn test_transport_mapping() {
        assert!(matches!(
            ErrorClassifier::classify_transport(TransportError::Timeout),
            NetworkError::Timeout
        ));
        assert!(matches!(
            ErrorClassifier::classify_transport(TransportError::Connect {
                message: "refused".into()
            }),
            NetworkError::NoConnection { .. }
        ));
        assert!(ErrorClassifier::classify_transport(TransportError::Cancelled).is_cancelled());
    }

    #[test]
    fn test_default_retry_eligibility() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::NoConnection.is_retryable());
        assert!(ErrorKind::ServerError.is_retryable());

        assert!(!ErrorKind::ClientError.is_retryable());
        assert!(!ErrorKind::Unauthorized.is_retryable());
        assert!(!ErrorKind::Parsing.is_retryable());
        assert!(!ErrorKind::InvalidRoute.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
        assert!(!ErrorKind::AuthenticationFailed.is_retryable());
        assert!(!ErrorKind::Unknown.is_retryable());
    }
}
