//! Token cache against a mock token endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use authbridge_oauth::{HttpTokenGrant, OAuthError, TokenCache, TokenCacheConfig, TokenRequest};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn token_body(token: &str, expires_in: u64) -> serde_json::Value {
    serde_json::json!({
        "access_token": token,
        "expires_in": expires_in,
        "token_type": "Bearer"
    })
}

fn cache(config: TokenCacheConfig) -> TokenCache {
    let grant = HttpTokenGrant::new(config.grant_timeout).unwrap();
    TokenCache::new(Arc::new(grant), config)
}

fn request(server: &MockServer) -> TokenRequest {
    TokenRequest::new(format!("{}/oauth2/token", server.uri()), "client", "secret")
        .with_scopes(vec!["mcp/invoke".to_string()])
}

#[tokio::test]
async fn fresh_token_makes_no_grant_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("t1", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let cache = cache(TokenCacheConfig::default());
    let first = cache.get_token(&request(&server)).await.unwrap();

    for _ in 0..5 {
        let again = cache.get_token(&request(&server)).await.unwrap();
        assert_eq!(again.secret(), first.secret());
    }
    // MockServer verifies `.expect(1)` on drop.
}

#[tokio::test]
async fn concurrent_callers_on_expired_key_share_one_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("shared", 3600))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(cache(TokenCacheConfig::default()));
    let request = request(&server);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let request = request.clone();
            tokio::spawn(async move { cache.get_token(&request).await })
        })
        .collect();

    for handle in handles {
        let token = handle.await.unwrap().unwrap();
        assert_eq!(token.secret(), "shared");
    }
    assert_eq!(cache.stats().grants, 1);
}

#[tokio::test]
async fn grant_failures_retry_with_backoff_then_fail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let config = TokenCacheConfig::default().with_retry(3, Duration::from_millis(50));
    let cache = cache(config);

    let start = Instant::now();
    let err = cache.get_token(&request(&server)).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, OAuthError::Provider { status: 500, .. }));
    // 50ms + 100ms of backoff between three attempts.
    assert!(elapsed >= Duration::from_millis(150), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": "invalid_client"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cache = cache(TokenCacheConfig::default());
    let err = cache.get_token(&request(&server)).await.unwrap_err();
    assert_eq!(
        err,
        OAuthError::Provider {
            status: 401,
            message: "invalid_client".to_string()
        }
    );
}

#[tokio::test]
async fn oversized_expires_in_fails_without_poisoning_the_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("forever", 10_000_000_000_000)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("t2", 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let cache = cache(TokenCacheConfig::default().with_retry(3, Duration::from_millis(10)));
    let err = cache.get_token(&request(&server)).await.unwrap_err();
    assert!(matches!(err, OAuthError::InvalidResponse(_)), "got {:?}", err);

    let token = cache.get_token(&request(&server)).await.unwrap();
    assert_eq!(token.secret(), "t2");
}
