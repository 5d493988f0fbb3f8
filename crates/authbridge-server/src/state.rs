//! Application state shared across handlers.

use std::collections::HashMap;
use std::sync::Arc;

use authbridge_config::{BridgeConfig, InboundSection, VerificationMode, resolve_client_secret};
use authbridge_oauth::{
    HttpTokenGrant, JwtVerifier, SharedVerifier, TokenCache, TokenCacheConfig, TokenGrant,
    TokenRequest, TrustedUpstream,
};
use authbridge_policy::RouteTable;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::forward::Forwarder;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,

    /// Routes, matched most specific first.
    pub routes: Arc<RouteTable>,

    /// Verifier for caller tokens.
    pub verifier: SharedVerifier,

    /// Downstream token cache. Flushed on shutdown.
    pub token_cache: Arc<TokenCache>,

    /// Grant requests by provider name, secrets resolved.
    pub providers: Arc<HashMap<String, TokenRequest>>,

    /// HTTP client for upstream calls.
    pub forwarder: Forwarder,
}

impl AppState {
    /// Create state from already-built parts.
    pub fn new(
        config: ServerConfig,
        routes: RouteTable,
        verifier: SharedVerifier,
        token_cache: Arc<TokenCache>,
    ) -> Result<Self> {
        let forwarder = Forwarder::new()?;
        Ok(Self {
            config: Arc::new(config),
            routes: Arc::new(routes),
            verifier,
            token_cache,
            providers: Arc::new(HashMap::new()),
            forwarder,
        })
    }

    /// Register the grant request used for `name`.
    pub fn with_provider(mut self, name: impl Into<String>, request: TokenRequest) -> Self {
        Arc::make_mut(&mut self.providers).insert(name.into(), request);
        self
    }

    /// Build everything a running proxy needs from a validated config.
    pub fn from_bridge_config(config: &BridgeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;
        for warning in config.warnings() {
            warn!("{}", warning);
        }

        let server = ServerConfig::from_bridge(config)?;
        let routes = RouteTable::from_config(&config.routes)
            .map_err(|e| ServerError::Config(e.to_string()))?
            .with_default_upstream(config.upstream().base_url.as_deref());

        let verifier = build_verifier(&config.inbound())?;

        let cache_section = config.token_cache();
        let grant: Arc<dyn TokenGrant> = Arc::new(
            HttpTokenGrant::new(cache_section.grant_timeout())
                .map_err(|e| ServerError::Config(e.to_string()))?,
        );
        let cache_config = TokenCacheConfig::default()
            .with_safety_margin(cache_section.safety_margin())
            .with_grant_timeout(cache_section.grant_timeout())
            .with_retry(cache_section.max_attempts, cache_section.initial_backoff())
            .with_stale_fallback(cache_section.stale_fallback);
        let token_cache = Arc::new(TokenCache::new(grant, cache_config));

        let mut state = Self::new(server, routes, verifier, token_cache)?;

        // Only providers some route mints for need a secret.
        let used: Vec<String> = state
            .routes
            .routes()
            .iter()
            .filter_map(|r| r.provider.clone())
            .collect();
        for (name, provider) in &config.providers {
            if !used.contains(name) {
                debug!(provider = %name, "Provider not used by any route");
                continue;
            }
            let secret = resolve_client_secret(name, provider)
                .map_err(|e| ServerError::Config(e.to_string()))?;
            debug!(provider = %name, source = %secret.source, "Resolved client secret");
            let request = TokenRequest::new(&provider.token_url, &provider.client_id, secret.value)
                .with_scopes(provider.scopes.clone())
                .with_audience(provider.audience.clone());
            state = state.with_provider(name.clone(), request);
        }

        info!(
            routes = state.routes.len(),
            providers = state.providers.len(),
            verification = state.verifier.mode(),
            "Proxy state ready"
        );
        Ok(state)
    }
}

fn build_verifier(inbound: &InboundSection) -> Result<SharedVerifier> {
    let verifier: SharedVerifier = match inbound.verification {
        VerificationMode::TrustedUpstream => {
            warn!("Caller tokens are decoded without signature checks (trusted_upstream)");
            Arc::new(TrustedUpstream)
        }
        VerificationMode::Hs256 => {
            let var = inbound.secret_env.as_deref().unwrap_or_default();
            let secret = std::env::var(var)
                .map_err(|_| ServerError::Config(format!("env var {} is not set", var)))?;
            Arc::new(
                JwtVerifier::hs256(secret.as_bytes())
                    .map_err(|e| ServerError::Config(e.to_string()))?
                    .with_issuer(inbound.issuer.as_deref())
                    .with_audience(inbound.audience.as_deref())
                    .with_leeway(inbound.leeway_secs),
            )
        }
        VerificationMode::Rs256 => {
            let path = inbound
                .public_key_pem_file
                .as_deref()
                .ok_or_else(|| ServerError::Config("public_key_pem_file is not set".into()))?;
            let pem = std::fs::read(path).map_err(|e| {
                ServerError::Config(format!("failed to read {}: {}", path.display(), e))
            })?;
            Arc::new(
                JwtVerifier::rs256(&pem)
                    .map_err(|e| ServerError::Config(e.to_string()))?
                    .with_issuer(inbound.issuer.as_deref())
                    .with_audience(inbound.audience.as_deref())
                    .with_leeway(inbound.leeway_secs),
            )
        }
    };
    Ok(verifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[upstream]
base_url = "http://127.0.0.1:9000"

[providers.runtime]
token_url = "http://127.0.0.1:9001/oauth2/token"
client_id = "gateway"
client_secret = "s3cret"
scopes = ["mcp/invoke"]

[providers.unused]
token_url = "http://127.0.0.1:9001/oauth2/token"
client_id = "other"

[[routes]]
pattern = "/mcp*"
requires_downstream_auth = true
provider = "runtime"
credential_relocation_header = "X-Caller-Token"
"#;

    #[test]
    fn test_from_bridge_config() {
        let config = BridgeConfig::from_toml(CONFIG).unwrap();
        let state = AppState::from_bridge_config(&config).unwrap();

        assert_eq!(state.routes.len(), 1);
        assert_eq!(state.verifier.mode(), "trusted_upstream");
        assert!(state.token_cache.is_empty());

        let request = &state.providers["runtime"];
        assert_eq!(request.client_id, "gateway");
        assert_eq!(request.client_secret(), "s3cret");
        assert_eq!(request.scopes, vec!["mcp/invoke".to_string()]);
        // No secret needed for a provider no route uses.
        assert!(!state.providers.contains_key("unused"));
    }

    #[test]
    fn test_missing_upstream_is_config_error() {
        let config = BridgeConfig::from_toml("[[routes]]\npattern = \"/a*\"\n").unwrap();
        assert!(matches!(
            AppState::from_bridge_config(&config),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn test_rs256_missing_pem_file() {
        let config = BridgeConfig::from_toml(
            r#"
[upstream]
base_url = "http://127.0.0.1:9000"

[inbound]
verification = "rs256"
public_key_pem_file = "/nonexistent/key.pem"

[[routes]]
pattern = "/a*"
"#,
        )
        .unwrap();
        let err = AppState::from_bridge_config(&config).err().unwrap();
        assert!(err.to_string().contains("/nonexistent/key.pem"));
    }
}
