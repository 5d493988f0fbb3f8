//! Error types for the server.

use authbridge_oauth::{OAuthError, VerifyError};
use authbridge_policy::ArbitrationError;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Startup and lifecycle errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration could not be turned into a running proxy.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listener or serve loop failure.
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Why a proxied request was not answered by the upstream.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    /// The identity provider failed to mint a downstream token.
    #[error("Failed to obtain downstream credential: {0}")]
    AuthProvider(OAuthError),

    /// The caller token could not be decoded or verified.
    #[error("Invalid caller token: {0}")]
    ClaimDecode(String),

    /// Two credentials competed for `Authorization` with nowhere to relocate one.
    #[error("{0}")]
    CredentialConflict(String),

    /// The upstream did not answer in time.
    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    /// The upstream could not be reached.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Authenticated, but not allowed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Missing or unacceptable caller credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        message: String,
        /// `WWW-Authenticate` challenge to send back.
        challenge: Option<String>,
    },

    /// Malformed request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No route matches the path.
    #[error("No route matches path '{0}'")]
    RouteNotFound(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        ProxyError::Unauthorized {
            message: message.into(),
            challenge: None,
        }
    }

    /// Stable identifier for programmatic handling.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::AuthProvider(_) => "auth_provider_error",
            ProxyError::ClaimDecode(_) => "claim_decode_error",
            ProxyError::CredentialConflict(_) => "credential_conflict",
            ProxyError::UpstreamTimeout(_) => "upstream_timeout",
            ProxyError::Upstream(_) => "upstream_error",
            ProxyError::Forbidden(_) => "forbidden",
            ProxyError::Unauthorized { .. } => "unauthorized",
            ProxyError::BadRequest(_) => "bad_request",
            ProxyError::RouteNotFound(_) => "route_not_found",
            ProxyError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::AuthProvider(e) if e.is_unreachable() => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::AuthProvider(_) => StatusCode::BAD_GATEWAY,
            ProxyError::ClaimDecode(_) => StatusCode::UNAUTHORIZED,
            ProxyError::CredentialConflict(_) => StatusCode::CONFLICT,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Forbidden(_) => StatusCode::FORBIDDEN,
            ProxyError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Attach the request context the error body reports.
    pub fn in_context(self, correlation_id: impl Into<String>, route: Option<String>) -> Rejection {
        Rejection {
            error: self,
            correlation_id: Some(correlation_id.into()),
            route,
        }
    }
}

impl From<OAuthError> for ProxyError {
    fn from(e: OAuthError) -> Self {
        ProxyError::AuthProvider(e)
    }
}

impl From<VerifyError> for ProxyError {
    fn from(e: VerifyError) -> Self {
        ProxyError::ClaimDecode(e.to_string())
    }
}

impl From<ArbitrationError> for ProxyError {
    fn from(e: ArbitrationError) -> Self {
        match e {
            ArbitrationError::CredentialConflict { .. } => {
                ProxyError::CredentialConflict(e.to_string())
            }
            ArbitrationError::MissingCallerCredential { .. } => ProxyError::Unauthorized {
                message: e.to_string(),
                challenge: Some("Bearer".to_string()),
            },
            ArbitrationError::MultipleAuthorizationHeaders => ProxyError::BadRequest(e.to_string()),
            ArbitrationError::SecondaryCredential { ref scheme, .. } => ProxyError::Unauthorized {
                challenge: scheme
                    .as_ref()
                    .map(|s| format!("{} realm=\"authbridge\"", s)),
                message: e.to_string(),
            },
            ArbitrationError::MissingDownstreamToken { .. }
            | ArbitrationError::InvalidHeaderValue { .. } => ProxyError::Internal(e.to_string()),
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Error kind for programmatic handling.
    pub kind: String,
    /// Human-readable error message.
    pub message: String,
    pub correlation_id: Option<String>,
    pub route: Option<String>,
}

/// A [`ProxyError`] with the request it belongs to.
#[derive(Debug)]
pub struct Rejection {
    pub error: ProxyError,
    pub correlation_id: Option<String>,
    pub route: Option<String>,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let kind = self.error.kind();
        let message = self.error.to_string();
        let correlation_id = self.correlation_id.as_deref().unwrap_or("-");
        let route = self.route.as_deref().unwrap_or("-");

        if status.is_server_error() {
            tracing::error!(
                status = %status.as_u16(),
                kind,
                correlation_id,
                route,
                error = %message,
                "Proxy error"
            );
        } else {
            tracing::warn!(
                status = %status.as_u16(),
                kind,
                correlation_id,
                route,
                error = %message,
                "Request rejected"
            );
        }

        let challenge = match self.error {
            ProxyError::Unauthorized {
                challenge: Some(ref challenge),
                ..
            } => HeaderValue::from_str(challenge).ok(),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                kind: kind.to_string(),
                message,
                correlation_id: self.correlation_id,
                route: self.route,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(challenge) = challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        Rejection {
            error: self,
            correlation_id: None,
            route: None,
        }
        .into_response()
    }
}
