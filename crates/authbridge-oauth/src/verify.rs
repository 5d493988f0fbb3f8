//! The trust boundary for caller claims.
//!
//! [`VerifiedClaims`] can only be built by a [`ClaimsVerifier`] in this crate, so code that
//! takes `&VerifiedClaims` cannot be handed claims that skipped verification.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};

use crate::claims::{CallerIdentity, ClaimDecodeError, Claims, decode_payload, strip_bearer};

/// Why a caller token was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("malformed token: {0}")]
    Decode(#[from] ClaimDecodeError),

    #[error("token expired")]
    Expired,

    #[error("token rejected: {0}")]
    Invalid(String),

    #[error("verification key error: {0}")]
    Key(String),
}

/// Claims that passed a [`ClaimsVerifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaims {
    claims: Claims,
}

impl VerifiedClaims {
    pub(crate) fn new(claims: Claims) -> Self {
        Self { claims }
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn identity(&self) -> CallerIdentity {
        self.claims.identity()
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.claims.has_group(group)
    }

    pub fn into_claims(self) -> Claims {
        self.claims
    }
}

/// Turns a caller token into verified claims.
pub trait ClaimsVerifier: Send + Sync + std::fmt::Debug {
    /// Accepts a raw JWT or a `Bearer <jwt>` header value.
    fn verify(&self, token: &str) -> Result<VerifiedClaims, VerifyError>;

    /// Short name for logs.
    fn mode(&self) -> &'static str;
}

/// Shared verifier for use across request tasks.
pub type SharedVerifier = Arc<dyn ClaimsVerifier>;

// ============================================================================
// TrustedUpstream
// ============================================================================

/// Accepts tokens already validated by a gateway in front of the proxy.
///
/// Only the structure and `exp` are checked. Never use this when callers can reach the
/// proxy directly.
#[derive(Debug, Clone, Default)]
pub struct TrustedUpstream;

impl ClaimsVerifier for TrustedUpstream {
    fn verify(&self, token: &str) -> Result<VerifiedClaims, VerifyError> {
        let claims = Claims::from_map(decode_payload(token)?);
        if claims.is_expired(chrono::Utc::now()) {
            return Err(VerifyError::Expired);
        }
        Ok(VerifiedClaims::new(claims))
    }

    fn mode(&self) -> &'static str {
        "trusted_upstream"
    }
}

// ============================================================================
// JwtVerifier
// ============================================================================

/// Verifies signature, `exp`, and optionally `iss`/`aud`.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    mode: &'static str,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("mode", &self.mode)
            .field("iss", &self.validation.iss)
            .field("aud", &self.validation.aud)
            .field("leeway", &self.validation.leeway)
            .finish()
    }
}

impl JwtVerifier {
    /// HMAC-SHA256 with a shared secret.
    pub fn hs256(secret: &[u8]) -> Result<Self, VerifyError> {
        if secret.is_empty() {
            return Err(VerifyError::Key("HS256 secret is empty".to_string()));
        }
        Ok(Self::with_key(
            DecodingKey::from_secret(secret),
            Algorithm::HS256,
            "hs256",
        ))
    }

    /// RSA-SHA256 with a PEM-encoded public key.
    pub fn rs256(public_key_pem: &[u8]) -> Result<Self, VerifyError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| VerifyError::Key(format!("invalid RSA public key: {}", e)))?;
        Ok(Self::with_key(key, Algorithm::RS256, "rs256"))
    }

    fn with_key(key: DecodingKey, algorithm: Algorithm, mode: &'static str) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;
        Self {
            key,
            validation,
            mode,
        }
    }

    pub fn with_issuer(mut self, issuer: Option<&str>) -> Self {
        if let Some(issuer) = issuer {
            self.validation.set_issuer(&[issuer]);
        }
        self
    }

    pub fn with_audience(mut self, audience: Option<&str>) -> Self {
        if let Some(audience) = audience {
            self.validation.set_audience(&[audience]);
            self.validation.validate_aud = true;
        }
        self
    }

    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.validation.leeway = leeway_secs;
        self
    }
}

impl ClaimsVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<VerifiedClaims, VerifyError> {
        let raw = strip_bearer(token);
        if raw.is_empty() {
            return Err(ClaimDecodeError::Empty.into());
        }

        let data = jsonwebtoken::decode::<Map<String, Value>>(raw, &self.key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => VerifyError::Expired,
                _ => VerifyError::Invalid(e.to_string()),
            })?;

        Ok(VerifiedClaims::new(Claims::from_map(data.claims)))
    }

    fn mode(&self) -> &'static str {
        self.mode
    }
}
