//! Health check endpoints.

use authbridge_oauth::{CacheStats, CachedTokenInfo};
use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Token cache report. Fingerprints only, never token values.
#[derive(Debug, Serialize)]
pub struct TokenHealthResponse {
    pub stats: CacheStats,
    pub tokens: Vec<CachedTokenInfo>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn token_health(State(state): State<AppState>) -> Json<TokenHealthResponse> {
    Json(TokenHealthResponse {
        stats: state.token_cache.stats(),
        tokens: state.token_cache.snapshot(),
    })
}

/// Create health check routes.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/healthz/tokens", get(token_health))
}
