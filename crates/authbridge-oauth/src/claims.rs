//! Unverified JWT claim extraction.
//!
//! Decoding here proves nothing about who sent the token. Only [`crate::verify`] turns
//! claims into something authorization decisions may rely on.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde_json::{Map, Value};

/// Why a token could not be decoded into claims.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimDecodeError {
    #[error("token is empty")]
    Empty,

    #[error("expected 3 dot-separated segments, found {0}")]
    SegmentCount(usize),

    #[error("payload is not valid base64url: {0}")]
    Base64(String),

    #[error("payload is not a JSON object: {0}")]
    Json(String),
}

/// Claims carried by a caller JWT.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Claims {
    pub sub: Option<String>,
    pub iss: Option<String>,
    /// `aud` may be a string or an array in the token.
    pub aud: Vec<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    /// From `cognito:groups`, falling back to `groups`.
    pub groups: Vec<String>,
    /// Space-separated `scope` claim.
    pub scope: Vec<String>,
    pub client_id: Option<String>,
    /// Every other claim, untouched.
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Build claims from a decoded payload object. Unexpected value types are ignored.
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        let sub = take_string(&mut map, "sub");
        let iss = take_string(&mut map, "iss");
        let aud = map.remove("aud").map(string_list).unwrap_or_default();
        let exp = map.remove("exp").and_then(|v| as_i64(&v));
        let iat = map.remove("iat").and_then(|v| as_i64(&v));

        let cognito_groups = map.remove("cognito:groups");
        let plain_groups = map.remove("groups");
        let groups = cognito_groups
            .or(plain_groups)
            .map(string_list)
            .unwrap_or_default();

        let scope = match map.remove("scope") {
            Some(Value::String(s)) => s.split_whitespace().map(String::from).collect(),
            Some(other) => string_list(other),
            None => Vec::new(),
        };
        let client_id = take_string(&mut map, "client_id");

        Self {
            sub,
            iss,
            aud,
            exp,
            iat,
            groups,
            scope,
            client_id,
            extra: map,
        }
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Whether `exp` is in the past. Tokens without `exp` never expire here.
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.exp.is_some_and(|exp| exp <= now.timestamp())
    }

    pub fn identity(&self) -> CallerIdentity {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| CallerIdentity::UNKNOWN_CLIENT.to_string());

        // Group-less tokens that name a client are machine-to-machine callers.
        let user_id = if self.groups.is_empty() && self.client_id.is_some() {
            format!("m2m:{}", client_id)
        } else {
            self.sub.clone().unwrap_or_else(|| client_id.clone())
        };

        CallerIdentity {
            user_id,
            groups: self.groups.clone(),
            client_id,
        }
    }
}

/// Who the caller is, as injected into identity headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerIdentity {
    pub user_id: String,
    pub groups: Vec<String>,
    pub client_id: String,
}

impl CallerIdentity {
    pub const ANONYMOUS_USER: &'static str = "anonymous";
    pub const UNKNOWN_CLIENT: &'static str = "unknown";

    pub fn anonymous() -> Self {
        Self {
            user_id: Self::ANONYMOUS_USER.to_string(),
            groups: Vec::new(),
            client_id: Self::UNKNOWN_CLIENT.to_string(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id == Self::ANONYMOUS_USER && self.groups.is_empty()
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => {
            map.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}

fn string_list(value: Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

/// Strip an optional `Bearer ` prefix (scheme matched case-insensitively).
pub fn strip_bearer(value: &str) -> &str {
    let trimmed = value.trim();
    match trimmed.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => trimmed,
    }
}

/// Decode the payload segment of a JWT without checking its signature.
///
/// Accepts a raw token or an `Authorization` value with a `Bearer` scheme.
pub fn decode_payload(token: &str) -> Result<Map<String, Value>, ClaimDecodeError> {
    let token = strip_bearer(token);
    if token.is_empty() {
        return Err(ClaimDecodeError::Empty);
    }

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(ClaimDecodeError::SegmentCount(segments.len()));
    }

    // Padding is optional in JWTs but tolerated.
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| ClaimDecodeError::Base64(e.to_string()))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ClaimDecodeError::Json(format!(
            "expected an object, found {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ClaimDecodeError::Json(e.to_string())),
    }
}

/// Decode a caller token into claims. Does not verify the signature.
pub fn extract_claims(token: &str) -> Result<Claims, ClaimDecodeError> {
    decode_payload(token).map(Claims::from_map)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Build an unsigned token with the given payload.
    pub(crate) fn unsigned_token(payload: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{}.{}.sig", header, body)
    }

    #[test]
    fn test_extract_cognito_claims() {
        let token = unsigned_token(&json!({
            "sub": "user-1",
            "iss": "https://cognito-idp/pool",
            "aud": "app",
            "exp": 2000000000,
            "cognito:groups": ["admin", "ops"],
            "scope": "openid mcp/invoke",
            "client_id": "client-1",
            "custom": 7
        }));

        let claims = extract_claims(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
        assert_eq!(claims.aud, vec!["app"]);
        assert_eq!(claims.groups, vec!["admin", "ops"]);
        assert_eq!(claims.scope, vec!["openid", "mcp/invoke"]);
        assert_eq!(claims.exp, Some(2000000000));
        assert_eq!(claims.extra["custom"], json!(7));
        assert!(claims.has_group("admin"));
    }

    #[test]
    fn test_accepts_bearer_prefix_and_padding() {
        let token = unsigned_token(&json!({"sub": "u"}));
        let (head, rest) = token.split_once('.').unwrap();
        let (payload, sig) = rest.split_once('.').unwrap();
        let padded = format!("{}.{}==.{}", head, payload, sig);

        assert_eq!(extract_claims(&format!("Bearer {}", token)).unwrap().sub.as_deref(), Some("u"));
        assert_eq!(extract_claims(&format!("bearer  {}", token)).unwrap().sub.as_deref(), Some("u"));
        assert_eq!(extract_claims(&padded).unwrap().sub.as_deref(), Some("u"));
    }

    #[test]
    fn test_aud_array_and_plain_groups() {
        let token = unsigned_token(&json!({"aud": ["a", "b"], "groups": ["g"]}));
        let claims = extract_claims(&token).unwrap();
        assert_eq!(claims.aud, vec!["a", "b"]);
        assert_eq!(claims.groups, vec!["g"]);
    }

    #[test]
    fn test_malformed_tokens_never_panic() {
        let cases = [
            "",
            "   ",
            "Bearer ",
            "abc",
            "a.b",
            "a.b.c.d",
            "a.!!!.c",
            "a..c",
            "a.bm90IGpzb24.c",
            "a.WzEsMl0.c",
            "....",
            "\u{0}.\u{1}.\u{2}",
            "a.8J-YgA.c",
        ];
        for case in cases {
            assert!(extract_claims(case).is_err(), "{:?} should not decode", case);
        }
    }

    #[test]
    fn test_error_variants() {
        assert_eq!(extract_claims(""), Err(ClaimDecodeError::Empty));
        assert_eq!(extract_claims("a.b"), Err(ClaimDecodeError::SegmentCount(2)));
        assert!(matches!(extract_claims("a.!!.c"), Err(ClaimDecodeError::Base64(_))));
        // "[1,2]"
        assert!(matches!(extract_claims("a.WzEsMl0.c"), Err(ClaimDecodeError::Json(_))));
    }

    #[test]
    fn test_wrong_claim_types_are_ignored() {
        let token = unsigned_token(&json!({"sub": {"nested": true}, "cognito:groups": 5, "exp": "soon"}));
        let claims = extract_claims(&token).unwrap();
        assert!(claims.sub.is_none());
        assert!(claims.groups.is_empty());
        assert!(claims.exp.is_none());
        assert!(claims.extra.contains_key("sub"));
    }

    #[test]
    fn test_identity_user() {
        let claims = Claims {
            sub: Some("user-1".into()),
            groups: vec!["admin".into()],
            client_id: Some("app".into()),
            ..Default::default()
        };
        let identity = claims.identity();
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.client_id, "app");
        assert!(!identity.is_anonymous());
    }

    #[test]
    fn test_identity_machine_client() {
        let claims = Claims {
            sub: Some("svc".into()),
            client_id: Some("m2m-app".into()),
            ..Default::default()
        };
        assert_eq!(claims.identity().user_id, "m2m:m2m-app");
    }

    #[test]
    fn test_identity_without_client() {
        let claims = Claims::default();
        let identity = claims.identity();
        assert_eq!(identity.user_id, "unknown");
        assert_eq!(identity.client_id, "unknown");
        assert!(CallerIdentity::anonymous().is_anonymous());
    }

    #[test]
    fn test_expiry() {
        let now = chrono::Utc::now();
        let past = Claims {
            exp: Some(now.timestamp() - 10),
            ..Default::default()
        };
        assert!(past.is_expired(now));
        assert!(!Claims::default().is_expired(now));
    }
}
