//! Route table: path patterns mapped to arbitration and authorization rules.

use std::collections::BTreeMap;
use std::time::Duration;

use authbridge_config::RouteConfig;
use http::{HeaderMap, HeaderName};

use crate::error::{ArbitrationError, PolicyError};

/// Exact path, or a literal prefix written with a trailing `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePattern {
    Exact(String),
    Prefix(String),
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Result<Self, PolicyError> {
        let invalid = |reason: &str| PolicyError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if !pattern.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        match pattern.strip_suffix('*') {
            Some(prefix) if prefix.contains('*') => Err(invalid("'*' is only allowed at the end")),
            Some(prefix) => Ok(RoutePattern::Prefix(prefix.to_string())),
            None if pattern.contains('*') => Err(invalid("'*' is only allowed at the end")),
            None => Ok(RoutePattern::Exact(pattern.to_string())),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            RoutePattern::Exact(p) => path == p,
            RoutePattern::Prefix(p) => path.starts_with(p.as_str()),
        }
    }

    /// Ordering key: longer literals first, exact before prefix at equal length.
    fn specificity(&self) -> (usize, bool) {
        match self {
            RoutePattern::Exact(p) => (p.len(), true),
            RoutePattern::Prefix(p) => (p.len(), false),
        }
    }
}

impl std::fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutePattern::Exact(p) => write!(f, "{}", p),
            RoutePattern::Prefix(p) => write!(f, "{}*", p),
        }
    }
}

/// A credential carried in its own header next to `Authorization`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryCredential {
    pub header: HeaderName,
    pub scheme: Option<String>,
    pub required: bool,
}

impl SecondaryCredential {
    /// Check presence and scheme. The value itself is forwarded untouched.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), ArbitrationError> {
        let reject = |reason: &str| ArbitrationError::SecondaryCredential {
            header: self.header.to_string(),
            scheme: self.scheme.clone(),
            reason: reason.to_string(),
        };

        let value = match headers.get(&self.header) {
            Some(value) => value,
            None if self.required => return Err(reject("required header is missing")),
            None => return Ok(()),
        };

        if let Some(ref scheme) = self.scheme {
            let value = value
                .to_str()
                .map_err(|_| reject("header value is not visible ASCII"))?;
            let matches = value
                .split_once(' ')
                .is_some_and(|(s, rest)| s.eq_ignore_ascii_case(scheme) && !rest.trim().is_empty());
            if !matches {
                return Err(reject(&format!("expected '{} <credentials>'", scheme)));
            }
        }

        Ok(())
    }
}

/// Rules for one route, built from its config.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePolicy {
    pub name: String,
    pub pattern: RoutePattern,
    pub upstream: Option<String>,
    pub requires_downstream_auth: bool,
    pub provider: Option<String>,
    pub relocation_header: Option<HeaderName>,
    pub preserve_caller_identity: bool,
    pub deny_on_conflict: bool,
    pub require_caller_credential: bool,
    pub identity_headers: bool,
    pub required_groups: Vec<String>,
    pub restricted_tools: BTreeMap<String, String>,
    pub secondary: Option<SecondaryCredential>,
    pub retry_non_idempotent: bool,
    pub timeout: Option<Duration>,
}

impl RoutePolicy {
    pub fn from_config(config: &RouteConfig) -> Result<Self, PolicyError> {
        let name = config.name().to_string();
        let header = |value: &str| {
            HeaderName::from_bytes(value.as_bytes()).map_err(|_| PolicyError::InvalidHeader {
                route: name.clone(),
                header: value.to_string(),
            })
        };

        let relocation_header = config
            .credential_relocation_header
            .as_deref()
            .map(header)
            .transpose()?;
        if relocation_header.as_ref() == Some(&http::header::AUTHORIZATION) {
            return Err(PolicyError::Invalid {
                route: name.clone(),
                reason: "credential_relocation_header must differ from Authorization".to_string(),
            });
        }

        let secondary = match config.secondary_credential {
            Some(ref secondary) => Some(SecondaryCredential {
                header: header(&secondary.header)?,
                scheme: secondary.scheme.clone(),
                required: secondary.required,
            }),
            None => None,
        };

        if config.requires_downstream_auth && config.provider.is_none() {
            return Err(PolicyError::Invalid {
                route: name.clone(),
                reason: "requires_downstream_auth needs a provider".to_string(),
            });
        }

        Ok(Self {
            pattern: RoutePattern::parse(&config.pattern)?,
            upstream: config.upstream.clone(),
            requires_downstream_auth: config.requires_downstream_auth,
            provider: config.provider.clone(),
            relocation_header,
            preserve_caller_identity: config.preserve_caller_identity,
            deny_on_conflict: config.deny_on_conflict,
            require_caller_credential: config.require_caller_credential,
            identity_headers: config.identity_headers,
            required_groups: config.required_groups.clone(),
            restricted_tools: config.restricted_tools.clone(),
            secondary,
            retry_non_idempotent: config.retry_non_idempotent,
            timeout: config.timeout_secs.map(Duration::from_secs),
            name,
        })
    }

    /// Whether serving this route depends on caller claims.
    pub fn needs_claims(&self) -> bool {
        self.identity_headers || !self.required_groups.is_empty() || !self.restricted_tools.is_empty()
    }
}

/// Ordered routes, matched most-specific first.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RoutePolicy>,
}

impl RouteTable {
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, PolicyError> {
        let routes = routes
            .iter()
            .map(RoutePolicy::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(routes))
    }

    pub fn new(routes: Vec<RoutePolicy>) -> Self {
        Self { routes }
    }

    /// Fill in the upstream of routes that do not name their own.
    pub fn with_default_upstream(mut self, upstream: Option<&str>) -> Self {
        if let Some(upstream) = upstream {
            for route in self.routes.iter_mut().filter(|r| r.upstream.is_none()) {
                route.upstream = Some(upstream.to_string());
            }
        }
        self
    }

    /// Most specific matching route. Equally specific routes resolve in declaration order.
    pub fn match_path(&self, path: &str) -> Option<&RoutePolicy> {
        let mut best: Option<&RoutePolicy> = None;
        for route in self.routes.iter().filter(|r| r.pattern.matches(path)) {
            match best {
                Some(current) if current.pattern.specificity() >= route.pattern.specificity() => {}
                _ => best = Some(route),
            }
        }
        best
    }

    pub fn routes(&self) -> &[RoutePolicy] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
