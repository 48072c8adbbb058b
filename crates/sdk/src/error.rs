//! Error types for the OpenPact SDK.

use openpact_core::auth::{ExpirySignal, RefreshFailed, SessionError};
use serde::{Deserialize, Serialize};

/// Result type for SDK operations.
pub type OpenPactResult<T> = Result<T, OpenPactError>;

/// Error code the gateway returns for an expired access token.
pub const TOKEN_EXPIRED: &str = "token_expired";

/// Error types that can occur when using the OpenPact SDK.
#[derive(Debug, thiserror::Error)]
pub enum OpenPactError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error (status {status}): {error}")]
    Api {
        status: u16,
        error: String,
        details: Option<String>,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Connection timeout.
    #[error("Request timed out")]
    Timeout,

    /// No tokens; log in or run setup first.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The refresh failed and the stored tokens were discarded. The caller
    /// must authenticate again.
    #[error("Session expired: {0}")]
    SessionExpired(RefreshFailed),

    /// The credential was still rejected after refreshing.
    #[error("Access token rejected after {0} refresh attempt(s)")]
    RetryLimitExceeded(u32),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl OpenPactError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Create an API error from a status code and response body.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorResponse>(body) {
            Ok(response) => Self::Api {
                status,
                error: response.error,
                details: response.details,
            },
            Err(_) => Self::Api {
                status,
                error: body.to_string(),
                details: None,
            },
        }
    }

    /// Whether this is a 404 from the gateway.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

impl ExpirySignal for OpenPactError {
    fn is_credential_expired(&self) -> bool {
        matches!(self, Self::Api { status: 401, error, .. } if error == TOKEN_EXPIRED)
    }
}

impl From<SessionError<OpenPactError>> for OpenPactError {
    fn from(err: SessionError<OpenPactError>) -> Self {
        match err {
            SessionError::NotAuthenticated => Self::NotAuthenticated,
            SessionError::RefreshFailed(e) => Self::SessionExpired(e),
            SessionError::RetryLimitExceeded(n) => Self::RetryLimitExceeded(n),
            SessionError::Call(e) => e,
        }
    }
}

/// Error response from the OpenPact API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response() {
        let err = OpenPactError::from_response(401, r#"{"error":"token_expired"}"#);
        assert!(err.is_credential_expired());

        let err = OpenPactError::from_response(401, r#"{"error":"invalid_token"}"#);
        assert!(!err.is_credential_expired());

        let err = OpenPactError::from_response(502, "Bad Gateway");
        assert!(matches!(&err, OpenPactError::Api { error, .. } if error == "Bad Gateway"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_session_error_mapping() {
        let err: OpenPactError = SessionError::RefreshFailed(RefreshFailed::Expired).into();
        assert!(matches!(err, OpenPactError::SessionExpired(RefreshFailed::Expired)));

        let err: OpenPactError = SessionError::<OpenPactError>::NotAuthenticated.into();
        assert!(matches!(err, OpenPactError::NotAuthenticated));
    }
}
