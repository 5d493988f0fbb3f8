//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [server]                 # listener settings
//! [upstream]               # default upstream target + forwarding policy
//! [token_cache]            # downstream token cache tuning
//! [inbound]                # how caller tokens are verified
//! [providers.cognito]      # named client-credentials providers
//! [[routes]]               # ordered route table with arbitration rules
//! ```

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Path prefix reserved for the proxy's own endpoints. Never proxied.
pub const RESERVED_PREFIX: &str = "/healthz";

/// Headers the proxy derives from caller identity. Routes cannot relocate into these.
pub const IDENTITY_HEADERS: &[&str] = &["x-user-id", "x-user-groups", "x-client-id"];

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. a project-local override
/// that only changes `[upstream]`) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Listener configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerSection>,

    /// Default upstream and forwarding policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamSection>,

    /// Downstream token cache tuning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_cache: Option<TokenCacheSection>,

    /// Inbound caller token verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound: Option<InboundSection>,

    /// Named OAuth2 client-credentials providers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Ordered route table. First declared wins on equally specific patterns.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
}

impl BridgeConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced wholesale, providers merge by name, and a non-empty
    /// route table in `other` replaces this one since route order is significant.
    pub fn merge(&mut self, other: BridgeConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }

        if other.upstream.is_some() {
            self.upstream = other.upstream;
        }

        if other.token_cache.is_some() {
            self.token_cache = other.token_cache;
        }

        if other.inbound.is_some() {
            self.inbound = other.inbound;
        }

        for (name, provider) in other.providers {
            self.providers.insert(name, provider);
        }

        if !other.routes.is_empty() {
            self.routes = other.routes;
        }
    }

    /// Effective server section.
    pub fn server(&self) -> ServerSection {
        self.server.clone().unwrap_or_default()
    }

    /// Effective upstream section.
    pub fn upstream(&self) -> UpstreamSection {
        self.upstream.clone().unwrap_or_default()
    }

    /// Effective token cache section.
    pub fn token_cache(&self) -> TokenCacheSection {
        self.token_cache.clone().unwrap_or_default()
    }

    /// Effective inbound section.
    pub fn inbound(&self) -> InboundSection {
        self.inbound.clone().unwrap_or_default()
    }

    /// Look up a provider by name.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Validate cross-references and field values.
    ///
    /// Secrets are not resolved here; see [`crate::resolve_client_secret`].
    pub fn validate(&self) -> Result<()> {
        self.server().bind_addr()?;

        let upstream = self.upstream();
        if let Some(ref base) = upstream.base_url {
            check_url(base, "base_url", "[upstream]")?;
        }
        if upstream.forward_retries > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::invalid(
                "forward_retries",
                "[upstream]",
                format!("must be at most {}", MAX_RETRY_ATTEMPTS),
            ));
        }
        let token_cache = self.token_cache();
        if token_cache.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::invalid(
                "max_attempts",
                "[token_cache]",
                format!("must be at most {}", MAX_RETRY_ATTEMPTS),
            ));
        }

        self.inbound().validate()?;

        for (name, provider) in &self.providers {
            provider.validate(name)?;
        }

        if self.routes.is_empty() {
            return Err(ConfigError::MissingField {
                field: "routes".to_string(),
                context: "config (at least one [[routes]] entry)".to_string(),
            });
        }

        let mut names = HashSet::new();
        for route in &self.routes {
            let context = format!("route '{}'", route.name());
            if !names.insert(route.name().to_string()) {
                return Err(ConfigError::invalid("name", context, "duplicate route name"));
            }

            route.validate()?;

            match (&route.upstream, &upstream.base_url) {
                (Some(url), _) => check_url(url, "upstream", &context)?,
                (None, Some(_)) => {}
                (None, None) => {
                    return Err(ConfigError::MissingField {
                        field: "upstream".to_string(),
                        context: format!("{} (no [upstream].base_url default)", context),
                    });
                }
            }

            if let Some(ref provider) = route.provider
                && !self.providers.contains_key(provider)
            {
                return Err(ConfigError::ProviderNotFound {
                    name: provider.clone(),
                    route: route.name().to_string(),
                });
            }
        }

        Ok(())
    }

    /// Non-fatal findings worth surfacing to the operator.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (name, provider) in &self.providers {
            if provider.client_secret.is_some() {
                warnings.push(format!(
                    "Provider '{}' has a plaintext client_secret in the config file. \
                     Prefer client_secret_env.",
                    name
                ));
            }
        }

        if self.inbound().verification == VerificationMode::TrustedUpstream
            && self.routes.iter().any(RouteConfig::needs_claims)
        {
            warnings.push(
                "inbound.verification = \"trusted_upstream\": caller JWT signatures are not \
                 checked here. Only run behind a gateway that validates them."
                    .to_string(),
            );
        }

        for route in &self.routes {
            if route.provider.is_some() && !route.requires_downstream_auth {
                warnings.push(format!(
                    "Route '{}' names provider '{}' but requires_downstream_auth = false; \
                     the provider is unused.",
                    route.name(),
                    route.provider.as_deref().unwrap_or_default()
                ));
            }
        }

        warnings
    }
}

fn check_url(value: &str, field: &str, context: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::invalid(field, context, format!("invalid URL: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            field,
            context,
            format!("unsupported scheme '{}'", parsed.scheme()),
        ));
    }
    Ok(())
}

fn check_header_name(value: &str, field: &str, context: &str) -> Result<http::HeaderName> {
    http::HeaderName::from_bytes(value.as_bytes())
        .map_err(|_| ConfigError::invalid(field, context, format!("'{}' is not a header name", value)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to bind to.
    pub bind: String,
    /// Log every request with method, path, status and duration.
    pub request_logging: bool,
    /// Maximum inbound request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8088".to_string(),
            request_logging: true,
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

impl ServerSection {
    /// Parse the bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| ConfigError::invalid("bind", "[server]", format!("{}", e)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Upstream
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bound for `forward_retries` and `max_attempts`.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Default upstream target and forwarding policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    /// Base URL requests are forwarded to unless a route overrides it.
    pub base_url: Option<String>,
    /// Timeout for a single forwarded call.
    pub timeout_secs: u64,
    /// Retries after a forwarded call times out.
    pub forward_retries: u32,
    /// First backoff between forward retries; doubles per attempt.
    pub initial_backoff_ms: u64,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 30,
            forward_retries: 2,
            initial_backoff_ms: 100,
        }
    }
}

impl UpstreamSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token cache
// ─────────────────────────────────────────────────────────────────────────────

/// Downstream token cache tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenCacheSection {
    /// A cached token is reused only while it has more than this left before expiry.
    pub safety_margin_secs: u64,
    /// Timeout for a single grant call.
    pub grant_timeout_secs: u64,
    /// Total grant attempts (first try included) before giving up.
    pub max_attempts: u32,
    /// First backoff between grant attempts; doubles per attempt.
    pub initial_backoff_ms: u64,
    /// Serve the previous token when a refresh fails and it has not expired yet.
    pub stale_fallback: bool,
}

impl Default for TokenCacheSection {
    fn default() -> Self {
        Self {
            safety_margin_secs: 300,
            grant_timeout_secs: 10,
            max_attempts: 3,
            initial_backoff_ms: 200,
            stale_fallback: false,
        }
    }
}

impl TokenCacheSection {
    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.safety_margin_secs)
    }

    pub fn grant_timeout(&self) -> Duration {
        Duration::from_secs(self.grant_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound verification
// ─────────────────────────────────────────────────────────────────────────────

/// How caller JWTs are turned into verified claims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// A gateway in front of the proxy already validated the token.
    #[default]
    TrustedUpstream,
    /// HMAC-SHA256 with a shared secret.
    Hs256,
    /// RSA-SHA256 with a public key.
    Rs256,
}

impl std::fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationMode::TrustedUpstream => write!(f, "trusted_upstream"),
            VerificationMode::Hs256 => write!(f, "hs256"),
            VerificationMode::Rs256 => write!(f, "rs256"),
        }
    }
}

/// Inbound caller token verification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundSection {
    pub verification: VerificationMode,
    /// Env var holding the HS256 secret.
    pub secret_env: Option<String>,
    /// PEM file holding the RS256 public key.
    pub public_key_pem_file: Option<PathBuf>,
    /// Expected `iss`, checked when set.
    pub issuer: Option<String>,
    /// Expected `aud`, checked when set.
    pub audience: Option<String>,
    /// Clock skew tolerated on `exp`/`nbf`.
    pub leeway_secs: u64,
}

impl Default for InboundSection {
    fn default() -> Self {
        Self {
            verification: VerificationMode::TrustedUpstream,
            secret_env: None,
            public_key_pem_file: None,
            issuer: None,
            audience: None,
            leeway_secs: 60,
        }
    }
}

impl InboundSection {
    fn validate(&self) -> Result<()> {
        match self.verification {
            VerificationMode::TrustedUpstream => Ok(()),
            VerificationMode::Hs256 if self.secret_env.is_none() => Err(ConfigError::MissingField {
                field: "secret_env".to_string(),
                context: "[inbound] (verification = \"hs256\")".to_string(),
            }),
            VerificationMode::Rs256 if self.public_key_pem_file.is_none() => {
                Err(ConfigError::MissingField {
                    field: "public_key_pem_file".to_string(),
                    context: "[inbound] (verification = \"rs256\")".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────────────────────────────────────

/// An OAuth2 token endpoint and the client credentials used against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Token endpoint URL. Also used as the issuer half of the cache key.
    pub token_url: String,
    pub client_id: String,
    /// Plaintext secret. Prefer `client_secret_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Env var holding the client secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_env: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Optional `audience` parameter sent with the grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

impl ProviderConfig {
    /// Env var consulted for the secret when `client_secret_env` is not set.
    pub fn default_secret_env(name: &str) -> String {
        let normalized: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("AUTHBRIDGE_{}_CLIENT_SECRET", normalized)
    }

    fn validate(&self, name: &str) -> Result<()> {
        let context = format!("[providers.{}]", name);
        check_url(&self.token_url, "token_url", &context)?;
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "client_id".to_string(),
                context,
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Routes
// ─────────────────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

/// A second credential that travels in its own header (e.g. database Basic auth).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryCredentialConfig {
    /// Header carrying the credential.
    pub header: String,
    /// Required auth scheme, e.g. `Basic`. Matched case-insensitively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    /// Reject requests that do not carry it.
    #[serde(default = "default_true")]
    pub required: bool,
}

/// Arbitration and authorization rules for one route pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route name used in logs and errors. Defaults to the pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Exact path, or a prefix ending in `*`.
    pub pattern: String,

    /// Upstream base URL for this route. Falls back to `[upstream].base_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,

    /// The next hop needs its own credential in `Authorization`.
    #[serde(default)]
    pub requires_downstream_auth: bool,

    /// Provider used to mint the downstream credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Header the caller's credential moves to when the downstream token takes
    /// `Authorization`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_relocation_header: Option<String>,

    /// The caller's credential must survive to the next hop.
    #[serde(default = "default_true")]
    pub preserve_caller_identity: bool,

    /// Reject requests whose credentials cannot be accounted for instead of
    /// treating an undecodable caller token as anonymous.
    #[serde(default = "default_true")]
    pub deny_on_conflict: bool,

    /// Reject requests without a caller `Authorization` header.
    #[serde(default = "default_true")]
    pub require_caller_credential: bool,

    /// Inject `X-User-Id`, `X-User-Groups` and `X-Client-Id` from caller claims.
    #[serde(default)]
    pub identity_headers: bool,

    /// Caller must belong to at least one of these groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_groups: Vec<String>,

    /// MCP tool name → group required to call it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub restricted_tools: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_credential: Option<SecondaryCredentialConfig>,

    /// Retry timed-out POST/PATCH calls too.
    #[serde(default)]
    pub retry_non_idempotent: bool,

    /// Per-route forwarded call timeout. Falls back to `[upstream].timeout_secs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl RouteConfig {
    /// Create a route with defaults for everything but the pattern.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            name: None,
            pattern: pattern.into(),
            upstream: None,
            requires_downstream_auth: false,
            provider: None,
            credential_relocation_header: None,
            preserve_caller_identity: true,
            deny_on_conflict: true,
            require_caller_credential: true,
            identity_headers: false,
            required_groups: Vec::new(),
            restricted_tools: BTreeMap::new(),
            secondary_credential: None,
            retry_non_idempotent: false,
            timeout_secs: None,
        }
    }

    /// Route name, defaulting to the pattern.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.pattern)
    }

    /// Whether caller claims have to be decoded to serve this route.
    pub fn needs_claims(&self) -> bool {
        self.identity_headers || !self.required_groups.is_empty() || !self.restricted_tools.is_empty()
    }

    fn validate(&self) -> Result<()> {
        let context = format!("route '{}'", self.name());

        if !self.pattern.starts_with('/') {
            return Err(ConfigError::invalid("pattern", context, "must start with '/'"));
        }
        if self.pattern.trim_end_matches('*').contains('*') {
            return Err(ConfigError::invalid(
                "pattern",
                context,
                "'*' is only allowed at the end",
            ));
        }
        if self.pattern.starts_with(RESERVED_PREFIX) {
            return Err(ConfigError::invalid(
                "pattern",
                context,
                format!("'{}' is reserved for the proxy", RESERVED_PREFIX),
            ));
        }

        if self.requires_downstream_auth && self.provider.is_none() {
            return Err(ConfigError::MissingField {
                field: "provider".to_string(),
                context: format!("{} (requires_downstream_auth = true)", context),
            });
        }

        let secondary = match self.secondary_credential {
            Some(ref secondary) => {
                let name = check_header_name(&secondary.header, "secondary_credential.header", &context)?;
                if name == http::header::AUTHORIZATION {
                    return Err(ConfigError::invalid(
                        "secondary_credential.header",
                        context,
                        "must differ from Authorization",
                    ));
                }
                Some(name)
            }
            None => None,
        };

        if let Some(ref header) = self.credential_relocation_header {
            let name = check_header_name(header, "credential_relocation_header", &context)?;
            if name == http::header::AUTHORIZATION {
                return Err(ConfigError::invalid(
                    "credential_relocation_header",
                    context,
                    "must differ from Authorization",
                ));
            }
            if secondary.as_ref() == Some(&name) {
                return Err(ConfigError::invalid(
                    "credential_relocation_header",
                    context,
                    "collides with secondary_credential.header",
                ));
            }
            if IDENTITY_HEADERS.contains(&name.as_str()) {
                return Err(ConfigError::invalid(
                    "credential_relocation_header",
                    context,
                    "collides with an injected identity header",
                ));
            }
        }

        if self.timeout_secs == Some(0) {
            return Err(ConfigError::invalid("timeout_secs", context, "must be positive"));
        }

        Ok(())
    }
}

/// Annotated starter config written by `authbridge config init`.
pub const CONFIG_TEMPLATE: &str = r#"# authbridge configuration

[server]
bind = "127.0.0.1:8088"
request_logging = true

[upstream]
base_url = "http://127.0.0.1:9000"
timeout_secs = 30
forward_retries = 2

[token_cache]
safety_margin_secs = 300
grant_timeout_secs = 10
max_attempts = 3
stale_fallback = false

[inbound]
# "trusted_upstream" only decodes caller JWTs; use it behind a validating gateway.
verification = "trusted_upstream"

[providers.runtime]
token_url = "https://example.auth.us-west-2.amazoncognito.com/oauth2/token"
client_id = "replace-me"
client_secret_env = "RUNTIME_CLIENT_SECRET"
scopes = ["mcp/invoke"]

[[routes]]
name = "mcp"
pattern = "/mcp*"
requires_downstream_auth = true
provider = "runtime"
credential_relocation_header = "X-Caller-Authorization"
identity_headers = true
restricted_tools = { admin_action = "admin" }
"#;
