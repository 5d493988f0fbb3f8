//! Downstream bearer tokens and the keys they are cached under.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

/// A minted downstream access token.
///
/// Immutable once minted. `Debug` prints a fingerprint, never the token.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    access_token: String,
    /// Token endpoint that issued the token.
    pub issuer: String,
    pub audience: Option<String>,
    pub scopes: Vec<String>,
    pub token_type: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BearerToken {
    pub fn new(
        access_token: impl Into<String>,
        issuer: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            issuer: issuer.into(),
            audience: None,
            scopes: Vec::new(),
            token_type: "Bearer".to_string(),
            issued_at: Utc::now(),
            expires_at,
        }
    }

    pub fn with_audience(mut self, audience: Option<String>) -> Self {
        self.audience = audience;
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    /// The raw token string.
    pub fn secret(&self) -> &str {
        &self.access_token
    }

    /// Value for an `Authorization` header.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Short, stable identifier safe to log.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.access_token)
    }

    /// Time left before hard expiry. Negative once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Reusable: more than `margin` left before expiry.
    pub fn is_fresh(&self, margin: std::time::Duration, now: DateTime<Utc>) -> bool {
        let margin = Duration::from_std(margin).unwrap_or(Duration::MAX);
        self.remaining(now) > margin
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerToken")
            .field("fingerprint", &self.fingerprint())
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// First 12 hex chars of the SHA-256 of a credential.
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}

/// Cache key for downstream tokens.
///
/// Scopes are sorted and deduplicated so that ordering in config does not split the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub issuer: String,
    pub client_id: String,
    pub audience: Option<String>,
    pub scopes: Vec<String>,
}

impl TokenKey {
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        audience: Option<String>,
        scopes: &[String],
    ) -> Self {
        let mut scopes = scopes.to_vec();
        scopes.sort();
        scopes.dedup();
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            audience,
            scopes,
        }
    }
}

impl std::fmt::Display for TokenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.issuer, self.client_id)?;
        if let Some(ref audience) = self.audience {
            write!(f, "@{}", audience)?;
        }
        if !self.scopes.is_empty() {
            write!(f, "[{}]", self.scopes.join(" "))?;
        }
        Ok(())
    }
}

/// Everything needed to mint a token: endpoint, audience and client credentials.
#[derive(Clone)]
pub struct TokenRequest {
    pub token_url: String,
    pub client_id: String,
    client_secret: String,
    pub scopes: Vec<String>,
    pub audience: Option<String>,
}

impl TokenRequest {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes: Vec::new(),
            audience: None,
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_audience(mut self, audience: Option<String>) -> Self {
        self.audience = audience;
        self
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn key(&self) -> TokenKey {
        TokenKey::new(
            self.token_url.clone(),
            self.client_id.clone(),
            self.audience.clone(),
            &self.scopes,
        )
    }
}

impl std::fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRequest")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("audience", &self.audience)
            .finish()
    }
}
