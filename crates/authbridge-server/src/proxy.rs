//! The proxy handler.
//!
//! Every request that is not a health check lands here and walks
//! `Received → Authenticating → Authorized → Forwarding → Responded`, or stops at
//! `Rejected` with a structured error and no upstream contact.

use authbridge_config::RESERVED_PREFIX;
use authbridge_oauth::{BearerToken, VerifiedClaims};
use authbridge_policy::{
    DenyKind, Operation, RoutePolicy, Verdict, arbitrate, caller_credential, decide, plan,
};
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use tracing::{debug, info};

use crate::error::ProxyError;
use crate::forward::{
    ForwardPolicy, OutboundRequest, is_idempotent, normalize_path, upstream_url,
};
use crate::lifecycle::{RequestLifecycle, RequestPhase};
use crate::middleware::correlation_id;
use crate::state::AppState;

/// Fallback handler: arbitrate credentials and forward.
pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let mut lifecycle = RequestLifecycle::new(correlation_id(request.headers()));

    match proxy(&state, &mut lifecycle, request).await {
        Ok(response) => {
            lifecycle.advance(RequestPhase::Responded);
            response
        }
        Err(error) => {
            lifecycle.advance(RequestPhase::Rejected);
            let route = lifecycle.route().map(str::to_string);
            error
                .in_context(lifecycle.correlation_id(), route)
                .into_response()
        }
    }
}

async fn proxy(
    state: &AppState,
    lifecycle: &mut RequestLifecycle,
    request: Request,
) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let path = normalize_path(parts.uri.path())?;
    if path != parts.uri.path() {
        debug!(
            correlation_id = lifecycle.correlation_id(),
            raw = parts.uri.path(),
            normalized = %path,
            "Normalized request path"
        );
    }

    if path.starts_with(RESERVED_PREFIX) {
        return Err(ProxyError::RouteNotFound(path));
    }
    let route = state
        .routes
        .match_path(&path)
        .ok_or_else(|| ProxyError::RouteNotFound(path.clone()))?;
    lifecycle.set_route(&route.name);
    let base = route
        .upstream
        .as_deref()
        .ok_or_else(|| ProxyError::Internal(format!("route '{}' has no upstream", route.name)))?;

    caller_credential(&parts.headers)?;

    let body = axum::body::to_bytes(body, state.config.max_body_size)
        .await
        .map_err(|e| ProxyError::BadRequest(format!("failed to read request body: {}", e)))?;

    lifecycle.advance(RequestPhase::Authenticating);
    let outbound_headers = authorize(state, route, &parts, &path, &body).await?;
    lifecycle.advance(RequestPhase::Authorized);

    let outbound = OutboundRequest {
        method: parts.method.clone(),
        url: upstream_url(base, &path, parts.uri.query()),
        headers: outbound_headers,
        body,
    };
    let policy = ForwardPolicy {
        timeout: route.timeout.unwrap_or(state.config.upstream_timeout),
        retries: if is_idempotent(&parts.method) || route.retry_non_idempotent {
            state.config.forward_retries
        } else {
            0
        },
        backoff: state.config.forward_backoff,
    };

    lifecycle.advance(RequestPhase::Forwarding);
    debug!(
        correlation_id = lifecycle.correlation_id(),
        route = %route.name,
        url = %outbound.url,
        "Forwarding request"
    );
    let response = state.forwarder.forward(outbound, policy).await?;

    info!(
        correlation_id = lifecycle.correlation_id(),
        route = %route.name,
        status = response.status().as_u16(),
        "Upstream responded"
    );
    Ok(response)
}

/// Verify the caller, decide, and produce the outbound header set.
async fn authorize(
    state: &AppState,
    route: &RoutePolicy,
    parts: &Parts,
    path: &str,
    body: &Bytes,
) -> Result<axum::http::HeaderMap, ProxyError> {
    let claims = caller_claims(state, route, parts)?;
    let operation = Operation::from_request(&parts.method, path, body);

    let decision = decide(route, claims.as_ref(), &operation);
    if let Verdict::Deny { kind, reason } = decision.verdict.clone() {
        return Err(match kind {
            DenyKind::Unauthenticated => ProxyError::Unauthorized {
                message: reason,
                challenge: Some("Bearer".to_string()),
            },
            DenyKind::Forbidden => ProxyError::Forbidden(reason),
        });
    }

    let plan = plan(&parts.headers, &decision)?;
    debug!(route = %route.name, plan = plan.as_str(), "Credential plan");

    let downstream = if plan.needs_downstream_token() {
        Some(downstream_token(state, route).await?)
    } else {
        None
    };

    Ok(arbitrate(&parts.headers, &decision, downstream.as_ref())?)
}

/// Caller claims, when the route has a use for them.
///
/// An unverifiable token is rejected on routes that deny on conflict and treated as
/// anonymous elsewhere.
fn caller_claims(
    state: &AppState,
    route: &RoutePolicy,
    parts: &Parts,
) -> Result<Option<VerifiedClaims>, ProxyError> {
    if !route.needs_claims() {
        return Ok(None);
    }
    let Some(value) = caller_credential(&parts.headers)? else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ProxyError::ClaimDecode("authorization header is not valid text".into()))?;

    match state.verifier.verify(value) {
        Ok(claims) => Ok(Some(claims)),
        Err(e) if route.deny_on_conflict => Err(e.into()),
        Err(e) => {
            debug!(route = %route.name, error = %e, "Caller token unusable, continuing as anonymous");
            Ok(None)
        }
    }
}

async fn downstream_token(state: &AppState, route: &RoutePolicy) -> Result<BearerToken, ProxyError> {
    let provider = route.provider.as_deref().ok_or_else(|| {
        ProxyError::Internal(format!("route '{}' mints tokens but names no provider", route.name))
    })?;
    let request = state.providers.get(provider).ok_or_else(|| {
        ProxyError::Internal(format!("provider '{}' is not configured", provider))
    })?;

    let token = state.token_cache.get_token(request).await?;
    debug!(
        route = %route.name,
        provider,
        token_fp = %token.fingerprint(),
        "Downstream token ready"
    );
    Ok(token)
}
