//! End-to-end proxy behaviour against mock identity provider and upstream.

mod common;

use std::time::{Duration, Instant};

use anyhow::Result;
use common::{TOKEN_PATH, TestProxy, caller_token, tool_call};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

async fn mount_upstream_ok(proxy: &TestProxy, at: &str) {
    Mock::given(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string("upstream ok"))
        .mount(&proxy.upstream)
        .await;
}

async fn error_kind(response: reqwest::Response) -> Result<String> {
    let body: Value = response.json().await?;
    Ok(body["error"]["kind"].as_str().unwrap_or_default().to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Arbitration scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_passthrough_keeps_caller_credential() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
name = "passthrough"
pattern = "/a/*"
"#,
    )
    .await?;
    proxy.mount_token("unused", 0).await;
    mount_upstream_ok(&proxy, "/a/tools").await;

    let response = proxy
        .client
        .get(proxy.url("/a/tools"))
        .header("authorization", "Bearer A")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "upstream ok");

    let seen = proxy.upstream_requests().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].headers["authorization"], "Bearer A");
    Ok(())
}

#[tokio::test]
async fn scenario_b_relocates_caller_credential() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
name = "relocate"
pattern = "/b/*"
requires_downstream_auth = true
provider = "runtime"
credential_relocation_header = "X-Caller-Token"
"#,
    )
    .await?;
    // Two requests, one grant.
    proxy.mount_token("B", 1).await;
    Mock::given(method("POST"))
        .and(path("/b/mcp"))
        .and(header("authorization", "Bearer B"))
        .and(header("x-caller-token", "Bearer A"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&proxy.upstream)
        .await;

    for _ in 0..2 {
        let response = proxy
            .client
            .post(proxy.url("/b/mcp"))
            .header("authorization", "Bearer A")
            // A caller cannot pre-fill the relocation header.
            .header("x-caller-token", "Bearer forged")
            .body("{}")
            .send()
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let stats = proxy.state.token_cache.stats();
    assert_eq!(stats.grants, 1);
    assert_eq!(stats.hits, 1);
    Ok(())
}

#[tokio::test]
async fn scenario_c_conflict_never_reaches_upstream() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
name = "conflict"
pattern = "/c/*"
requires_downstream_auth = true
provider = "runtime"
"#,
    )
    .await?;
    proxy.mount_token("B", 0).await;
    Mock::given(path("/c/mcp"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&proxy.upstream)
        .await;

    let response = proxy
        .client
        .post(proxy.url("/c/mcp"))
        .header("authorization", "Bearer A")
        .header("x-request-id", "conflict-1")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(response.headers()["x-request-id"], "conflict-1");

    let body: Value = response.json().await?;
    assert_eq!(body["error"]["kind"], "credential_conflict");
    assert_eq!(body["error"]["route"], "conflict");
    assert_eq!(body["error"]["correlation_id"], "conflict-1");
    Ok(())
}

#[tokio::test]
async fn scenario_d_grant_failures_retry_then_502() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
name = "mint"
pattern = "/d/*"
requires_downstream_auth = true
provider = "runtime"
require_caller_credential = false
"#,
    )
    .await?;
    Mock::given(method("POST"))
        .and(path(common::TOKEN_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&proxy.idp)
        .await;
    Mock::given(path("/d/x"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&proxy.upstream)
        .await;

    let start = Instant::now();
    let response = proxy.client.get(proxy.url("/d/x")).send().await?;
    let elapsed = start.elapsed();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(error_kind(response).await?, "auth_provider_error");
    // Backoff of 50 ms then 100 ms between the three attempts.
    assert!(elapsed >= Duration::from_millis(150), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "elapsed {:?}", elapsed);
    Ok(())
}

#[tokio::test]
async fn mint_only_without_caller_credential() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
pattern = "/m2m/*"
requires_downstream_auth = true
provider = "runtime"
require_caller_credential = false
"#,
    )
    .await?;
    proxy.mount_token("minted", 1).await;
    mount_upstream_ok(&proxy, "/m2m/jobs").await;

    let response = proxy.client.get(proxy.url("/m2m/jobs")).send().await?;
    assert_eq!(response.status(), StatusCode::OK);

    let seen = proxy.upstream_requests().await;
    assert_eq!(seen[0].headers["authorization"], "Bearer minted");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Request validation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unmatched_path_is_404() -> Result<()> {
    let proxy = TestProxy::start("[[routes]]\npattern = \"/a/*\"\n").await?;

    let response = proxy
        .client
        .get(proxy.url("/elsewhere"))
        .header("authorization", "Bearer A")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(error_kind(response).await?, "route_not_found");
    assert!(proxy.upstream_requests().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn multiple_authorization_headers_are_rejected() -> Result<()> {
    let proxy = TestProxy::start("[[routes]]\npattern = \"/a/*\"\n").await?;

    let response = proxy
        .client
        .get(proxy.url("/a/x"))
        .header("authorization", "Bearer A")
        .header("authorization", "Bearer Z")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(response).await?, "bad_request");
    assert!(proxy.upstream_requests().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn secondary_credential_challenge() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
pattern = "/graph/*"
secondary_credential = { header = "X-Neo4j-Authorization", scheme = "Basic" }
"#,
    )
    .await?;
    mount_upstream_ok(&proxy, "/graph/query").await;

    let missing = proxy
        .client
        .get(proxy.url("/graph/query"))
        .header("authorization", "Bearer A")
        .send()
        .await?;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(missing.headers()["www-authenticate"], "Basic realm=\"authbridge\"");

    let present = proxy
        .client
        .get(proxy.url("/graph/query"))
        .header("authorization", "Bearer A")
        .header("x-neo4j-authorization", "Basic bmVvNGo6cHc=")
        .send()
        .await?;
    assert_eq!(present.status(), StatusCode::OK);

    let seen = proxy.upstream_requests().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].headers["x-neo4j-authorization"], "Basic bmVvNGo6cHc=");
    assert_eq!(seen[0].headers["authorization"], "Bearer A");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Claims
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn restricted_tool_requires_group() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
pattern = "/mcp*"
restricted_tools = { admin_action = "admin" }
"#,
    )
    .await?;
    mount_upstream_ok(&proxy, "/mcp").await;

    let user = caller_token(json!({"sub": "u1", "cognito:groups": ["users"]}));
    let admin = caller_token(json!({"sub": "a1", "cognito:groups": ["admin"]}));

    let denied = proxy
        .client
        .post(proxy.url("/mcp"))
        .bearer_auth(&user)
        .json(&tool_call("gateway-target___admin_action"))
        .send()
        .await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    let body: Value = denied.json().await?;
    assert_eq!(body["error"]["kind"], "forbidden");
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap_or_default()
            .contains("admin_action")
    );
    assert!(proxy.upstream_requests().await.is_empty());

    let allowed = proxy
        .client
        .post(proxy.url("/mcp"))
        .bearer_auth(&admin)
        .json(&tool_call("admin_action"))
        .send()
        .await?;
    assert_eq!(allowed.status(), StatusCode::OK);

    let other_tool = proxy
        .client
        .post(proxy.url("/mcp"))
        .bearer_auth(&user)
        .json(&tool_call("echo"))
        .send()
        .await?;
    assert_eq!(other_tool.status(), StatusCode::OK);

    // Forwarded body is byte-identical.
    let seen = proxy.upstream_requests().await;
    let forwarded: Value = serde_json::from_slice(&seen[0].body)?;
    assert_eq!(forwarded, tool_call("admin_action"));
    Ok(())
}

#[tokio::test]
async fn identity_headers_replace_spoofed_values() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
pattern = "/api/*"
identity_headers = true
"#,
    )
    .await?;
    mount_upstream_ok(&proxy, "/api/me").await;

    let token = caller_token(json!({
        "sub": "user-1",
        "cognito:groups": ["ops", "admin"],
        "client_id": "web"
    }));
    let response = proxy
        .client
        .get(proxy.url("/api/me"))
        .bearer_auth(&token)
        .header("x-user-id", "attacker")
        .header("x-user-groups", "admin")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let seen = proxy.upstream_requests().await;
    let headers = &seen[0].headers;
    assert_eq!(headers["x-user-id"], "user-1");
    assert_eq!(headers["x-user-groups"], "ops,admin");
    assert_eq!(headers["x-client-id"], "web");
    assert_eq!(headers.get_all("x-user-id").iter().count(), 1);
    Ok(())
}

#[tokio::test]
async fn malformed_caller_token_is_401() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
pattern = "/api/*"
identity_headers = true
"#,
    )
    .await?;

    let response = proxy
        .client
        .get(proxy.url("/api/me"))
        .bearer_auth("not.a-jwt")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_kind(response).await?, "claim_decode_error");
    assert!(proxy.upstream_requests().await.is_empty());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Forwarding
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upstream_response_is_relayed_unchanged() -> Result<()> {
    let proxy = TestProxy::start("[[routes]]\npattern = \"/a/*\"\n").await?;
    Mock::given(method("GET"))
        .and(path("/a/teapot"))
        .and(query_param("brew", "earl grey"))
        .respond_with(
            ResponseTemplate::new(418)
                .insert_header("x-upstream", "yes")
                .set_body_string("short and stout"),
        )
        .expect(1)
        .mount(&proxy.upstream)
        .await;

    let response = proxy
        .client
        .get(proxy.url("/a/teapot?brew=earl%20grey"))
        .header("authorization", "Bearer A")
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 418);
    assert_eq!(response.headers()["x-upstream"], "yes");
    assert_eq!(response.text().await?, "short and stout");
    Ok(())
}

#[tokio::test]
async fn event_stream_is_relayed() -> Result<()> {
    let proxy = TestProxy::start("[[routes]]\npattern = \"/sse*\"\n").await?;
    let events = "event: message\ndata: {\"n\":1}\n\nevent: message\ndata: {\"n\":2}\n\n";
    Mock::given(path("/sse"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(events, "text/event-stream"))
        .mount(&proxy.upstream)
        .await;

    let response = proxy
        .client
        .get(proxy.url("/sse"))
        .header("authorization", "Bearer A")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.text().await?, events);
    Ok(())
}

#[tokio::test]
async fn idempotent_request_timeouts_are_retried() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
pattern = "/slow*"
timeout_secs = 1
"#,
    )
    .await?;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .expect(3)
        .mount(&proxy.upstream)
        .await;

    let response = proxy
        .client
        .get(proxy.url("/slow"))
        .header("authorization", "Bearer A")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(error_kind(response).await?, "upstream_timeout");
    Ok(())
}

#[tokio::test]
async fn non_idempotent_request_timeouts_are_not_retried() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
pattern = "/slow*"
timeout_secs = 1
"#,
    )
    .await?;
    Mock::given(method("POST"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .expect(1)
        .mount(&proxy.upstream)
        .await;

    let response = proxy
        .client
        .post(proxy.url("/slow"))
        .header("authorization", "Bearer A")
        .body("{}")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    Ok(())
}

#[tokio::test]
async fn unreachable_upstream_is_502() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
pattern = "/gone*"
upstream = "http://127.0.0.1:1"
"#,
    )
    .await?;

    let response = proxy
        .client
        .get(proxy.url("/gone"))
        .header("authorization", "Bearer A")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(error_kind(response).await?, "upstream_error");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Path handling
// ─────────────────────────────────────────────────────────────────────────────

/// Send a request line exactly as written; HTTP clients would resolve dot segments first.
async fn raw_get(proxy: &TestProxy, target: &str) -> Result<String> {
    let mut stream = TcpStream::connect(proxy.addr).await?;
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        target, proxy.addr
    );
    stream.write_all(request.as_bytes()).await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(String::from_utf8_lossy(&response).into_owned())
}

#[tokio::test]
async fn dot_segments_cannot_escape_an_open_route() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
name = "admin"
pattern = "/admin*"
required_groups = ["admin"]

[[routes]]
name = "public"
pattern = "/public*"
require_caller_credential = false
"#,
    )
    .await?;
    Mock::given(path("/admin/secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ADMIN-ONLY"))
        .expect(0)
        .mount(&proxy.upstream)
        .await;
    mount_upstream_ok(&proxy, "/public/page").await;

    for target in [
        "/public/../admin/secret",
        "/public/%2e%2e/admin/secret",
        "/public/%2E%2E/admin/secret",
    ] {
        let response = raw_get(&proxy, target).await?;
        assert!(response.starts_with("HTTP/1.1 401"), "{}: {}", target, response);
        assert!(!response.contains("ADMIN-ONLY"), "{}", target);
        assert!(response.contains("\"route\":\"admin\""), "{}: {}", target, response);
    }

    let response = raw_get(&proxy, "/public/./page?x=1").await?;
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);

    let seen = proxy.upstream_requests().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].url.path(), "/public/page");
    assert_eq!(seen[0].url.query(), Some("x=1"));
    Ok(())
}

#[tokio::test]
async fn unrepresentable_token_lifetime_is_502_then_recovers() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
pattern = "/b/*"
requires_downstream_auth = true
provider = "runtime"
require_caller_credential = false
"#,
    )
    .await?;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "forever",
            "expires_in": 10_000_000_000_000u64
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&proxy.idp)
        .await;
    proxy.mount_token("B", 1).await;
    mount_upstream_ok(&proxy, "/b/x").await;

    let response = proxy.client.get(proxy.url("/b/x")).send().await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(error_kind(response).await?, "auth_provider_error");

    let response = proxy.client.get(proxy.url("/b/x")).send().await?;
    assert_eq!(response.status(), StatusCode::OK);
    let seen = proxy.upstream_requests().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].headers["authorization"], "Bearer B");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoints_are_not_proxied() -> Result<()> {
    let proxy = TestProxy::start(
        r#"
[[routes]]
pattern = "/b/*"
requires_downstream_auth = true
provider = "runtime"
require_caller_credential = false
"#,
    )
    .await?;
    proxy.mount_token("secret-token-value", 1).await;
    mount_upstream_ok(&proxy, "/b/x").await;

    let health: Value = proxy.client.get(proxy.url("/healthz")).send().await?.json().await?;
    assert_eq!(health["status"], "ok");

    proxy.client.get(proxy.url("/b/x")).send().await?;

    let tokens = proxy
        .client
        .get(proxy.url("/healthz/tokens"))
        .send()
        .await?
        .text()
        .await?;
    assert!(!tokens.contains("secret-token-value"));

    let tokens: Value = serde_json::from_str(&tokens)?;
    assert_eq!(tokens["stats"]["entries"], 1);
    assert_eq!(tokens["tokens"][0]["fresh"], true);
    assert_eq!(tokens["tokens"][0]["fingerprint"].as_str().map(str::len), Some(12));

    assert_eq!(proxy.upstream_requests().await.len(), 1);
    Ok(())
}
