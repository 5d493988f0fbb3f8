//! Downstream credentials and caller claims for authbridge.
//!
//! # Components
//!
//! - [`token`]: `BearerToken`, cache keys and grant requests
//! - [`grant`]: OAuth2 client-credentials grant against a token endpoint
//! - [`retry`]: Exponential backoff for transient failures
//! - [`token_cache`]: Single-flight cache of downstream tokens
//! - [`claims`]: Unverified JWT claim extraction
//! - [`verify`]: The trust boundary producing `VerifiedClaims`

pub mod claims;
pub mod error;
pub mod grant;
pub mod retry;
pub mod token;
pub mod token_cache;
pub mod verify;

pub use claims::{CallerIdentity, ClaimDecodeError, Claims, decode_payload, extract_claims};
pub use error::{OAuthError, Result};
pub use grant::{HttpTokenGrant, TokenGrant};
pub use retry::{Retryable, with_retry};
pub use token::{BearerToken, TokenKey, TokenRequest};
pub use token_cache::{CacheStats, CachedTokenInfo, TokenCache, TokenCacheConfig};
pub use verify::{ClaimsVerifier, JwtVerifier, SharedVerifier, TrustedUpstream, VerifiedClaims, VerifyError};
