//! Arbitration of the single outbound `Authorization` header.
//!
//! At most one credential leaves in `Authorization`. When the next hop needs its own token
//! and the caller's credential has to survive, the caller's value moves verbatim to the
//! route's relocation header. With nowhere to move it, the request is a conflict.

use authbridge_oauth::BearerToken;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::decision::RoutingDecision;
use crate::error::ArbitrationError;

/// How the outbound credential set is assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialPlan {
    /// No caller credential, none needed downstream.
    Anonymous,
    /// No caller credential; the minted token goes in `Authorization`.
    MintOnly,
    /// The caller's `Authorization` is forwarded unchanged.
    Passthrough,
    /// The minted token replaces the caller's credential, which the route does not keep.
    Replace,
    /// Minted token in `Authorization`, caller's value moved to `header`.
    Relocate { header: HeaderName },
}

impl CredentialPlan {
    pub fn needs_downstream_token(&self) -> bool {
        matches!(
            self,
            CredentialPlan::MintOnly | CredentialPlan::Replace | CredentialPlan::Relocate { .. }
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialPlan::Anonymous => "anonymous",
            CredentialPlan::MintOnly => "mint_only",
            CredentialPlan::Passthrough => "passthrough",
            CredentialPlan::Replace => "replace",
            CredentialPlan::Relocate { .. } => "relocate",
        }
    }
}

/// The caller's `Authorization` value, rejecting requests that carry several.
pub fn caller_credential(inbound: &HeaderMap) -> Result<Option<&HeaderValue>, ArbitrationError> {
    let mut values = inbound.get_all(AUTHORIZATION).iter();
    let first = values.next();
    if values.next().is_some() {
        return Err(ArbitrationError::MultipleAuthorizationHeaders);
    }
    Ok(first.filter(|v| !v.as_bytes().iter().all(u8::is_ascii_whitespace)))
}

/// Decide how credentials will be placed, before any token is fetched.
pub fn plan(inbound: &HeaderMap, decision: &RoutingDecision) -> Result<CredentialPlan, ArbitrationError> {
    let caller = caller_credential(inbound)?;

    if caller.is_none() && decision.require_caller_credential {
        return Err(ArbitrationError::MissingCallerCredential {
            route: decision.route.clone(),
        });
    }

    if let Some(ref secondary) = decision.secondary {
        secondary.check(inbound)?;
    }

    let plan = match (caller.is_some(), decision.requires_downstream_auth) {
        (false, false) => CredentialPlan::Anonymous,
        (false, true) => CredentialPlan::MintOnly,
        (true, false) => CredentialPlan::Passthrough,
        (true, true) if !decision.preserve_caller_identity => CredentialPlan::Replace,
        (true, true) => match decision.relocation_header {
            Some(ref header) => CredentialPlan::Relocate {
                header: header.clone(),
            },
            None => {
                return Err(ArbitrationError::CredentialConflict {
                    route: decision.route.clone(),
                });
            }
        },
    };

    Ok(plan)
}

/// Build the outbound header set.
///
/// Pure: the same inbound headers, decision and token always give the same result.
/// Hop-by-hop headers are left to the forwarder.
pub fn arbitrate(
    inbound: &HeaderMap,
    decision: &RoutingDecision,
    downstream: Option<&BearerToken>,
) -> Result<HeaderMap, ArbitrationError> {
    let plan = plan(inbound, decision)?;
    let caller = caller_credential(inbound)?.cloned();

    let mut outbound = inbound.clone();
    outbound.remove(AUTHORIZATION);
    for name in &decision.strip {
        outbound.remove(name);
    }
    // Only the proxy writes the relocation header.
    if let Some(ref header) = decision.relocation_header {
        outbound.remove(header);
    }

    let minted = if plan.needs_downstream_token() {
        let token = downstream.ok_or_else(|| ArbitrationError::MissingDownstreamToken {
            route: decision.route.clone(),
        })?;
        Some(
            HeaderValue::from_str(&token.header_value()).map_err(|e| {
                ArbitrationError::InvalidHeaderValue {
                    header: AUTHORIZATION.to_string(),
                    reason: e.to_string(),
                }
            })?,
        )
    } else {
        None
    };

    match (&plan, caller, minted) {
        (CredentialPlan::Anonymous, _, _) => {}
        (CredentialPlan::Passthrough, Some(caller), _) => {
            outbound.insert(AUTHORIZATION, caller);
        }
        (CredentialPlan::MintOnly, _, Some(minted)) => {
            outbound.insert(AUTHORIZATION, minted);
        }
        (CredentialPlan::Replace, _, Some(minted)) => {
            tracing::debug!(
                route = %decision.route,
                "Caller credential intentionally dropped (preserve_caller_identity = false)"
            );
            outbound.insert(AUTHORIZATION, minted);
        }
        (CredentialPlan::Relocate { header }, Some(caller), Some(minted)) => {
            outbound.insert(AUTHORIZATION, minted);
            outbound.insert(header.clone(), caller);
        }
        // `plan` guarantees the caller credential and minted token exist where needed.
        (plan, _, _) => {
            return Err(ArbitrationError::InvalidHeaderValue {
                header: AUTHORIZATION.to_string(),
                reason: format!("inconsistent credential plan '{}'", plan.as_str()),
            });
        }
    }

    for (name, value) in &decision.inject {
        outbound.insert(name.clone(), value.clone());
    }

    Ok(outbound)
}
