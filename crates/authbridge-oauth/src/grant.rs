//! OAuth2 client-credentials grant.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{OAuthError, Result};
use crate::token::{BearerToken, TokenRequest};

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Mints a downstream token for a request. One call is one attempt; retries live in the cache.
#[async_trait]
pub trait TokenGrant: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, request: &TokenRequest) -> Result<BearerToken>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client-credentials grant over HTTP (RFC 6749 §4.4).
#[derive(Debug, Clone)]
pub struct HttpTokenGrant {
    client: reqwest::Client,
}

impl HttpTokenGrant {
    /// Create a grant client whose calls time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OAuthError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Use an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenGrant for HttpTokenGrant {
    async fn fetch(&self, request: &TokenRequest) -> Result<BearerToken> {
        let scope = request.scopes.join(" ");
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "client_credentials"),
            ("client_id", request.client_id.as_str()),
            ("client_secret", request.client_secret()),
        ];
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }
        if let Some(ref audience) = request.audience {
            form.push(("audience", audience.as_str()));
        }

        let response = self
            .client
            .post(&request.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {}", err.error, desc),
                    None => err.error,
                },
                Err(_) if body.is_empty() => "empty response body".to_string(),
                Err(_) => body,
            };
            return Err(OAuthError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::InvalidResponse(format!("Failed to parse token response: {}", e)))?;

        if body.access_token.is_empty() {
            return Err(OAuthError::InvalidResponse("empty access_token".to_string()));
        }

        let expires_in = body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_at = expiry_after(chrono::Utc::now(), expires_in)?;
        let scopes = match body.scope {
            Some(scope) => scope.split_whitespace().map(String::from).collect(),
            None => request.scopes.clone(),
        };

        let token = BearerToken::new(body.access_token, request.token_url.clone(), expires_at)
            .with_audience(request.audience.clone())
            .with_scopes(scopes)
            .with_token_type(body.token_type.unwrap_or_else(|| "Bearer".to_string()));

        tracing::debug!(
            issuer = %request.token_url,
            client_id = %request.client_id,
            token_fp = %token.fingerprint(),
            expires_in = expires_in,
            "Minted downstream token"
        );

        Ok(token)
    }
}

/// `now + expires_in`, or `InvalidResponse` when the lifetime is not representable.
fn expiry_after(
    now: chrono::DateTime<chrono::Utc>,
    expires_in: u64,
) -> Result<chrono::DateTime<chrono::Utc>> {
    i64::try_from(expires_in)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| {
            OAuthError::InvalidResponse(format!("expires_in out of range: {}", expires_in))
        })
}
