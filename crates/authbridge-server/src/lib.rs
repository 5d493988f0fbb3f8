//! Credential-arbitrating reverse proxy server.
//!
//! Sits between callers and upstream services. For each request it matches a route,
//! verifies caller claims when the route needs them, mints a downstream token from the
//! shared cache when the upstream needs its own credential, settles the single outbound
//! `Authorization` header, and forwards the request with the body streamed back.
//!
//! # Example
//!
//! ```ignore
//! use authbridge_server::{AppState, Server};
//!
//! let state = AppState::from_bridge_config(&config)?;
//! Server::from_state(state).run().await?;
//! ```

pub mod config;
pub mod error;
pub mod forward;
pub mod lifecycle;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{ProxyError, Rejection, Result, ServerError};
pub use forward::{ForwardError, ForwardPolicy, Forwarder};
pub use lifecycle::{RequestLifecycle, RequestPhase};
pub use middleware::{REQUEST_ID_HEADER, request_logging_middleware};
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use axum::http::HeaderName;
use axum::{Router, middleware as axum_middleware};
use tokio::net::TcpListener;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// The authbridge proxy server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

        Router::new()
            // Health routes, never proxied
            .merge(routes::health_routes())
            // Everything else goes through the proxy
            .fallback(proxy::proxy_handler)
            // Request logging (inner layer, runs last)
            .layer(axum_middleware::from_fn_with_state(
                self.state.clone(),
                middleware::request_logging_middleware,
            ))
            // Echo the correlation id on every response
            .layer(PropagateRequestIdLayer::new(request_id.clone()))
            // TraceLayer for detailed HTTP tracing
            .layer(TraceLayer::new_for_http())
            // Assign a correlation id when the caller did not send a usable one
            .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
            .layer(axum_middleware::map_request(middleware::sanitize_request_id))
            .with_state(self.state.clone())
    }

    /// Run the server until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_address;
        self.run_on(addr).await
    }

    /// Run the server on a specific address until Ctrl-C.
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, routes = self.state.routes.len(), "Starting authbridge proxy");

        let cache = self.state.token_cache.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    tracing::warn!("Ctrl-C handler unavailable, running until killed");
                    std::future::pending::<()>().await;
                }
                info!("Shutdown requested");
            })
            .await?;

        cache.flush();
        info!("Proxy stopped");
        Ok(())
    }

    /// Run with graceful shutdown in a background task, returning the bound address.
    ///
    /// The token cache is flushed once the server stops.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.state.config.bind_address).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Starting authbridge proxy");

        let router = self.router();
        let cache = self.state.token_cache.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "Proxy server failed");
            }
            cache.flush();
        });
        Ok(local_addr)
    }
}
