//! Client secret resolution for OAuth providers.
//!
//! Resolution order:
//! 1. Environment variable (`client_secret_env`, or `AUTHBRIDGE_<NAME>_CLIENT_SECRET`)
//! 2. Config file (`client_secret`, with a load-time warning)

use crate::{ConfigError, ProviderConfig, Result};

/// A resolved secret with provenance.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    /// The secret value.
    pub value: String,
    /// Where the secret was found.
    pub source: SecretSource,
}

impl std::fmt::Debug for ResolvedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecret")
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// Where a secret was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Environment variable.
    EnvVar(String),
    /// Config file (plaintext, not recommended).
    ConfigFile,
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSource::EnvVar(var) => write!(f, "env var {}", var),
            SecretSource::ConfigFile => write!(f, "config file (plaintext)"),
        }
    }
}

/// Resolve the client secret for a named provider.
pub fn resolve_client_secret(name: &str, provider: &ProviderConfig) -> Result<ResolvedSecret> {
    resolve_with(name, provider, |var| std::env::var(var).ok())
}

fn resolve_with(
    name: &str,
    provider: &ProviderConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedSecret> {
    let env_var = provider
        .client_secret_env
        .clone()
        .unwrap_or_else(|| ProviderConfig::default_secret_env(name));

    if let Some(value) = lookup(&env_var)
        && !value.is_empty()
    {
        return Ok(ResolvedSecret {
            value,
            source: SecretSource::EnvVar(env_var),
        });
    }

    match provider.client_secret {
        Some(ref value) if !value.is_empty() => Ok(ResolvedSecret {
            value: value.clone(),
            source: SecretSource::ConfigFile,
        }),
        _ => Err(ConfigError::SecretNotFound {
            provider: name.to_string(),
            env_var,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(secret: Option<&str>, env: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            token_url: "https://auth/token".to_string(),
            client_id: "id".to_string(),
            client_secret: secret.map(String::from),
            client_secret_env: env.map(String::from),
            scopes: Vec::new(),
            audience: None,
        }
    }

    #[test]
    fn test_env_var_wins_over_config() {
        let p = provider(Some("from-file"), Some("MY_SECRET"));
        let resolved = resolve_with("p", &p, |var| {
            (var == "MY_SECRET").then(|| "from-env".to_string())
        })
        .unwrap();
        assert_eq!(resolved.value, "from-env");
        assert_eq!(resolved.source, SecretSource::EnvVar("MY_SECRET".to_string()));
    }

    #[test]
    fn test_default_env_var_name() {
        let p = provider(None, None);
        let resolved = resolve_with("cognito", &p, |var| {
            (var == "AUTHBRIDGE_COGNITO_CLIENT_SECRET").then(|| "s".to_string())
        })
        .unwrap();
        assert_eq!(resolved.value, "s");
    }

    #[test]
    fn test_falls_back_to_config_file() {
        let p = provider(Some("from-file"), Some("UNSET"));
        let resolved = resolve_with("p", &p, |_| None).unwrap();
        assert_eq!(resolved.value, "from-file");
        assert_eq!(resolved.source, SecretSource::ConfigFile);
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        let p = provider(Some("from-file"), Some("EMPTY"));
        let resolved = resolve_with("p", &p, |_| Some(String::new())).unwrap();
        assert_eq!(resolved.source, SecretSource::ConfigFile);
    }

    #[test]
    fn test_not_found() {
        let p = provider(None, Some("UNSET"));
        let err = resolve_with("p", &p, |_| None).unwrap_err();
        assert!(err.to_string().contains("UNSET"));
    }

    #[test]
    fn test_debug_redacts_value() {
        let secret = ResolvedSecret {
            value: "hunter2".to_string(),
            source: SecretSource::ConfigFile,
        };
        assert!(!format!("{:?}", secret).contains("hunter2"));
    }
}
