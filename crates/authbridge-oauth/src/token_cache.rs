//! Single-flight cache of downstream bearer tokens.
//!
//! A token is reused while it has more than the safety margin left. When it does not, the
//! first caller for that key spawns one grant task; every other caller for the key awaits
//! the same shared result. The grant task owns the cache write, so cancelling callers never
//! strands a half-finished refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{OAuthError, Result};
use crate::grant::TokenGrant;
use crate::retry::with_retry;
use crate::token::{BearerToken, TokenKey, TokenRequest};

/// Default reuse margin before expiry (5 minutes).
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(300);

/// Default timeout for one grant call.
pub const DEFAULT_GRANT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default total grant attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default first backoff between grant attempts.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(200);

type GrantFuture = Shared<BoxFuture<'static, Result<BearerToken>>>;

/// Token cache tuning.
#[derive(Debug, Clone)]
pub struct TokenCacheConfig {
    pub safety_margin: Duration,
    pub grant_timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub stale_fallback: bool,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            safety_margin: DEFAULT_SAFETY_MARGIN,
            grant_timeout: DEFAULT_GRANT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            stale_fallback: false,
        }
    }
}

impl TokenCacheConfig {
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn with_grant_timeout(mut self, timeout: Duration) -> Self {
        self.grant_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, initial_backoff: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn with_stale_fallback(mut self, enabled: bool) -> Self {
        self.stale_fallback = enabled;
        self
    }
}

#[derive(Default)]
struct Entry {
    token: Option<BearerToken>,
    inflight: Option<GrantFuture>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<TokenKey, Entry>,
    /// Bumped by `flush`; grants started before a flush do not write back.
    generation: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    grants: AtomicU64,
    failures: AtomicU64,
    fallbacks: AtomicU64,
}

/// Counters exposed on the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub grants: u64,
    pub failures: u64,
    pub fallbacks: u64,
}

/// A cached token described without its value.
#[derive(Debug, Clone, Serialize)]
pub struct CachedTokenInfo {
    pub key: String,
    pub fingerprint: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in_secs: i64,
    pub fresh: bool,
}

/// Cache of downstream tokens keyed by issuer, client, audience and scopes.
pub struct TokenCache {
    grant: Arc<dyn TokenGrant>,
    config: TokenCacheConfig,
    state: Arc<Mutex<CacheState>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("grant", &self.grant)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl TokenCache {
    pub fn new(grant: Arc<dyn TokenGrant>, config: TokenCacheConfig) -> Self {
        Self {
            grant,
            config,
            state: Arc::new(Mutex::new(CacheState::default())),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn config(&self) -> &TokenCacheConfig {
        &self.config
    }

    /// Get a token for `request`, minting one if the cached token is missing or near expiry.
    pub async fn get_token(&self, request: &TokenRequest) -> Result<BearerToken> {
        let key = request.key();

        let pending = {
            let mut state = self.state.lock();
            let generation = state.generation;
            let entry = state.entries.entry(key.clone()).or_default();

            if let Some(ref token) = entry.token
                && token.is_fresh(self.config.safety_margin, Utc::now())
            {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key = %key, token_fp = %token.fingerprint(), "Token cache hit");
                return Ok(token.clone());
            }

            match entry.inflight {
                Some(ref inflight) => {
                    tracing::debug!(key = %key, "Joining in-flight token grant");
                    inflight.clone()
                }
                None => {
                    let inflight = self.spawn_grant(key.clone(), request.clone(), generation);
                    entry.inflight = Some(inflight.clone());
                    inflight
                }
            }
        };

        pending.await
    }

    fn spawn_grant(&self, key: TokenKey, request: TokenRequest, generation: u64) -> GrantFuture {
        let grant = Arc::clone(&self.grant);
        let state = Arc::clone(&self.state);
        let counters = Arc::clone(&self.counters);
        let config = self.config.clone();

        tracing::debug!(key = %key, "Requesting downstream token");

        let waiter_key = key.clone();
        let task = tokio::spawn(async move {
            counters.grants.fetch_add(1, Ordering::Relaxed);
            let label = key.to_string();
            let result = with_retry(config.max_attempts, config.initial_backoff, &label, || {
                let grant = Arc::clone(&grant);
                let request = request.clone();
                let timeout = config.grant_timeout;
                async move {
                    match tokio::time::timeout(timeout, grant.fetch(&request)).await {
                        Ok(result) => result,
                        Err(_) => Err(OAuthError::Timeout(format!(
                            "no response within {}ms",
                            timeout.as_millis()
                        ))),
                    }
                }
            })
            .await;

            let mut state = state.lock();
            let current = state.generation == generation;
            let entry = state.entries.entry(key.clone()).or_default();
            if current {
                entry.inflight = None;
            }

            match result {
                Ok(token) => {
                    if current {
                        entry.token = Some(token.clone());
                    }
                    tracing::info!(
                        key = %key,
                        token_fp = %token.fingerprint(),
                        expires_at = %token.expires_at,
                        "Downstream token refreshed"
                    );
                    Ok(token)
                }
                Err(e) => {
                    let now = Utc::now();
                    if config.stale_fallback
                        && let Some(ref previous) = entry.token
                        && !previous.is_expired(now)
                    {
                        counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            key = %key,
                            token_fp = %previous.fingerprint(),
                            expires_in_secs = previous.remaining(now).num_seconds(),
                            error = %e,
                            "Token refresh failed, serving previous token"
                        );
                        return Ok(previous.clone());
                    }

                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(key = %key, error = %e, "Token grant failed");
                    Err(e)
                }
            }
        });

        let state = Arc::clone(&self.state);
        let counters = Arc::clone(&self.counters);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    // The task died before it could release the key.
                    let mut state = state.lock();
                    if state.generation == generation
                        && let Some(entry) = state.entries.get_mut(&waiter_key)
                    {
                        entry.inflight = None;
                    }
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(key = %waiter_key, error = %e, "Token grant task failed");
                    Err(OAuthError::Internal(format!("token grant task failed: {}", e)))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Drop the cached token for a key. An in-flight grant still completes.
    pub fn invalidate(&self, key: &TokenKey) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.token = None;
            tracing::debug!(key = %key, "Token invalidated");
        }
    }

    /// Drop every cached token.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        let dropped = state.entries.values().filter(|e| e.token.is_some()).count();
        state.entries.clear();
        state.generation += 1;
        tracing::debug!(dropped = dropped, "Token cache flushed");
    }

    /// Number of cached tokens.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| e.token.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            grants: self.counters.grants.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Cached tokens, described by fingerprint.
    pub fn snapshot(&self) -> Vec<CachedTokenInfo> {
        let now = Utc::now();
        let state = self.state.lock();
        let mut tokens: Vec<CachedTokenInfo> = state
            .entries
            .iter()
            .filter_map(|(key, entry)| {
                entry.token.as_ref().map(|token| CachedTokenInfo {
                    key: key.to_string(),
                    fingerprint: token.fingerprint(),
                    expires_at: token.expires_at,
                    expires_in_secs: token.remaining(now).num_seconds(),
                    fresh: token.is_fresh(self.config.safety_margin, now),
                })
            })
            .collect();
        tokens.sort_by(|a, b| a.key.cmp(&b.key));
        tokens
    }
}
