//! Upstream forwarding.
//!
//! Requests go out with the arbitrated headers minus hop-by-hop ones. Responses come
//! back with their body streamed, so event streams are relayed as they arrive.

use std::time::Duration;

use authbridge_oauth::{Retryable, with_retry};
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, Method, Response, header};
use futures::TryStreamExt;
use thiserror::Error;
use url::Url;

use crate::error::{ProxyError, Result, ServerError};

/// Headers that describe one connection and are never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    for name in &listed {
        headers.remove(name);
    }
}

/// Methods that may be replayed after a timeout without the caller's consent.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
    )
}

/// Resolve dot segments (`..`, `%2e%2e`, backslash separators) the way the outbound URL
/// parser does, so routing sees the path that is actually forwarded.
pub fn normalize_path(path: &str) -> std::result::Result<String, ProxyError> {
    let mut url = Url::parse("http://authbridge.invalid/")
        .map_err(|e| ProxyError::Internal(format!("path normalization failed: {}", e)))?;
    url.set_path(path);
    Ok(url.path().to_string())
}

/// Join a base URL, a normalized path and the inbound query.
pub fn upstream_url(base: &str, path: &str, query: Option<&str>) -> String {
    match query {
        Some(query) => format!("{}{}?{}", base.trim_end_matches('/'), path, query),
        None => format!("{}{}", base.trim_end_matches('/'), path),
    }
}

/// A single upstream call failure.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("{0}")]
    Other(String),
}

impl Retryable for ForwardError {
    fn is_retryable(&self) -> bool {
        matches!(self, ForwardError::Timeout(_))
    }
}

impl From<ForwardError> for ProxyError {
    fn from(e: ForwardError) -> Self {
        match e {
            ForwardError::Timeout(_) => ProxyError::UpstreamTimeout(e.to_string()),
            ForwardError::Connect(_) | ForwardError::Other(_) => ProxyError::Upstream(e.to_string()),
        }
    }
}

/// What to send upstream.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Retry settings for one forwarded call.
#[derive(Debug, Clone, Copy)]
pub struct ForwardPolicy {
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub retries: u32,
    pub backoff: Duration,
}

/// Sends requests upstream.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ServerError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Forward `request`, retrying timeouts as `policy` allows.
    ///
    /// The timeout covers the wait for response headers only; a streamed body may run
    /// for as long as the upstream keeps it open.
    pub async fn forward(
        &self,
        request: OutboundRequest,
        policy: ForwardPolicy,
    ) -> std::result::Result<Response<Body>, ForwardError> {
        let OutboundRequest {
            method,
            url,
            mut headers,
            body,
        } = request;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        let upstream = with_retry(policy.retries.saturating_add(1), policy.backoff, &url, || {
            let call = self
                .client
                .request(method.clone(), &url)
                .headers(headers.clone())
                .body(body.clone())
                .send();
            async move {
                match tokio::time::timeout(policy.timeout, call).await {
                    Err(_) => Err(ForwardError::Timeout(policy.timeout)),
                    Ok(Err(e)) if e.is_timeout() => Err(ForwardError::Timeout(policy.timeout)),
                    Ok(Err(e)) if e.is_connect() => Err(ForwardError::Connect(e.to_string())),
                    Ok(Err(e)) => Err(ForwardError::Other(e.to_string())),
                    Ok(Ok(response)) => Ok(response),
                }
            }
        })
        .await?;

        Ok(relay(upstream))
    }
}

/// Turn an upstream response into ours, body streamed through.
fn relay(upstream: reqwest::Response) -> Response<Body> {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let stream = upstream.bytes_stream().map_err(std::io::Error::other);
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
