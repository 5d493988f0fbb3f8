//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use anyhow::Result;
use authbridge_config::BridgeConfig;
use authbridge_server::{AppState, Server};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::oneshot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path of the token endpoint on the mock identity provider.
pub const TOKEN_PATH: &str = "/oauth2/token";

/// A proxy running in the background between a mock identity provider and a mock upstream.
pub struct TestProxy {
    /// The proxy's address.
    pub addr: SocketAddr,
    /// HTTP client for talking to the proxy.
    pub client: Client,
    /// Mock OAuth2 token endpoint.
    pub idp: MockServer,
    /// Mock upstream service.
    pub upstream: MockServer,
    /// Application state, shared with the running server.
    pub state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestProxy {
    /// Start a proxy with the given `[[routes]]` (and any extra) TOML.
    ///
    /// Provider `runtime` points at the mock identity provider.
    pub async fn start(routes: &str) -> Result<Self> {
        let idp = MockServer::start().await;
        let upstream = MockServer::start().await;

        let toml = format!(
            r#"
[server]
bind = "127.0.0.1:0"
request_logging = false

[upstream]
base_url = "{upstream}"
initial_backoff_ms = 20

[token_cache]
initial_backoff_ms = 50

[providers.runtime]
token_url = "{idp}{token_path}"
client_id = "gateway"
client_secret = "s3cret"

{routes}
"#,
            upstream = upstream.uri(),
            idp = idp.uri(),
            token_path = TOKEN_PATH,
            routes = routes,
        );
        let config = BridgeConfig::from_toml(&toml)?;
        let state = AppState::from_bridge_config(&config)?;

        let (tx, rx) = oneshot::channel();
        let addr = Server::from_state(state.clone())
            .run_with_shutdown(async move {
                let _ = rx.await;
            })
            .await?;

        Ok(Self {
            addr,
            client: Client::new(),
            idp,
            upstream,
            state,
            shutdown: Some(tx),
        })
    }

    /// Get the URL for a path on the proxy.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Serve `access_token` from the token endpoint, expecting `calls` grant requests.
    pub async fn mount_token(&self, access_token: &str, calls: u64) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(calls)
            .mount(&self.idp)
            .await;
    }

    /// Requests the upstream has seen so far.
    pub async fn upstream_requests(&self) -> Vec<wiremock::Request> {
        self.upstream.received_requests().await.unwrap_or_default()
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// An unsigned JWT carrying `claims`, as a trusting proxy would receive it.
pub fn caller_token(claims: Value) -> String {
    format!("e30.{}.sig", URL_SAFE_NO_PAD.encode(claims.to_string()))
}

/// A JSON-RPC `tools/call` body.
pub fn tool_call(name: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": {"name": name, "arguments": {}}
    })
}
