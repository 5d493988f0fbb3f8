//! Error types for downstream token acquisition.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, OAuthError>;

/// Errors that can occur while obtaining a downstream token.
///
/// `Clone` because a single grant result is shared by every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OAuthError {
    /// The token endpoint could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The grant call exceeded its timeout.
    #[error("Token endpoint timed out: {0}")]
    Timeout(String),

    /// The token endpoint answered with an error status.
    #[error("Token endpoint returned {status}: {message}")]
    Provider { status: u16, message: String },

    /// The token endpoint answered 2xx with an unusable body.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// The grant task failed to complete.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OAuthError {
    /// Transient failures worth another attempt: network, timeout, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            OAuthError::Network(_) | OAuthError::Timeout(_) => true,
            OAuthError::Provider { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether the provider never answered at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, OAuthError::Network(_))
    }
}

impl From<reqwest::Error> for OAuthError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OAuthError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            OAuthError::Provider {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            OAuthError::Network(e.to_string())
        }
    }
}
