//! Per-request routing decisions.

use authbridge_oauth::{CallerIdentity, VerifiedClaims};
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::operation::Operation;
use crate::route::{RoutePolicy, SecondaryCredential};

/// Headers derived from caller identity. Inbound copies are always stripped.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_GROUPS_HEADER: &str = "x-user-groups";
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyKind {
    /// No usable caller claims.
    Unauthenticated,
    /// Claims present, permission missing.
    Forbidden,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny { kind: DenyKind, reason: String },
}

/// Outcome of routing one request. Built fresh per request, never stored.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub verdict: Verdict,
    pub route: String,
    pub upstream: Option<String>,
    pub identity: CallerIdentity,
    /// Headers to set on the outbound request.
    pub inject: HeaderMap,
    /// Inbound headers to remove before forwarding.
    pub strip: Vec<HeaderName>,
    pub requires_downstream_auth: bool,
    pub preserve_caller_identity: bool,
    pub require_caller_credential: bool,
    pub relocation_header: Option<HeaderName>,
    pub secondary: Option<SecondaryCredential>,
}

impl RoutingDecision {
    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }

    fn deny(&mut self, kind: DenyKind, reason: String) {
        if self.verdict == Verdict::Allow {
            self.verdict = Verdict::Deny { kind, reason };
        }
    }
}

/// Authorize `operation` on `route` for the caller and collect header changes.
///
/// Without claims, any group rule denies.
pub fn decide(
    route: &RoutePolicy,
    claims: Option<&VerifiedClaims>,
    operation: &Operation,
) -> RoutingDecision {
    let identity = claims
        .map(VerifiedClaims::identity)
        .unwrap_or_else(CallerIdentity::anonymous);

    let mut decision = RoutingDecision {
        verdict: Verdict::Allow,
        route: route.name.clone(),
        upstream: route.upstream.clone(),
        identity,
        inject: HeaderMap::new(),
        strip: [USER_ID_HEADER, USER_GROUPS_HEADER, CLIENT_ID_HEADER]
            .into_iter()
            .map(HeaderName::from_static)
            .collect(),
        requires_downstream_auth: route.requires_downstream_auth,
        preserve_caller_identity: route.preserve_caller_identity,
        require_caller_credential: route.require_caller_credential,
        relocation_header: route.relocation_header.clone(),
        secondary: route.secondary.clone(),
    };

    if !route.required_groups.is_empty() {
        match claims {
            None => decision.deny(
                DenyKind::Unauthenticated,
                format!("route '{}' requires an authenticated caller", route.name),
            ),
            Some(claims) if !route.required_groups.iter().any(|g| claims.has_group(g)) => {
                decision.deny(
                    DenyKind::Forbidden,
                    format!(
                        "route '{}' requires one of the groups [{}]; caller has [{}]",
                        route.name,
                        route.required_groups.join(", "),
                        claims.claims().groups.join(", ")
                    ),
                )
            }
            Some(_) => {}
        }
    }

    for tool in operation.tools() {
        let Some(group) = route.restricted_tools.get(tool) else {
            continue;
        };
        match claims {
            None => decision.deny(
                DenyKind::Unauthenticated,
                format!("tool '{}' requires an authenticated caller", tool),
            ),
            Some(claims) if !claims.has_group(group) => {
                let groups = &claims.claims().groups;
                decision.deny(
                    DenyKind::Forbidden,
                    format!(
                        "Access denied: Tool '{}' requires '{}' group. Your groups: {}",
                        tool,
                        group,
                        if groups.is_empty() {
                            "none".to_string()
                        } else {
                            groups.join(", ")
                        }
                    ),
                )
            }
            Some(_) => {}
        }
    }

    if route.identity_headers && decision.is_allowed() {
        let identity = decision.identity.clone();
        let values = [
            (USER_ID_HEADER, identity.user_id),
            (USER_GROUPS_HEADER, identity.groups.join(",")),
            (CLIENT_ID_HEADER, identity.client_id),
        ];
        for (name, value) in values {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    decision.inject.insert(HeaderName::from_static(name), value);
                }
                Err(_) => decision.deny(
                    DenyKind::Unauthenticated,
                    format!("caller identity cannot be carried in {}", name),
                ),
            }
        }
    }

    tracing::debug!(
        route = %decision.route,
        user_id = %decision.identity.user_id,
        rpc_method = operation.rpc_method().unwrap_or("-"),
        allowed = decision.is_allowed(),
        "Routing decision"
    );

    decision
}
